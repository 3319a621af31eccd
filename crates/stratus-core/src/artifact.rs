use std::path::{Path, PathBuf};
use stratus_schema::{FunctionDef, ServiceDescription, TEARDOWN_ARTIFACT};

/// Where a function's deployable code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Path(PathBuf),
    /// No artifact; the current invocation tears the stack down.
    Teardown,
}

/// Locates function artifacts:
/// 1. the function's own `package.artifact`;
/// 2. `<package root>/<function>.zip` when the function or the service is
///    packaged individually;
/// 3. the service's `package.artifact`, else `<package root>/<service>.zip`.
pub struct ArtifactLocator<'a> {
    root: &'a Path,
    service: &'a ServiceDescription,
    package_root: PathBuf,
}

impl<'a> ArtifactLocator<'a> {
    pub fn new(root: &'a Path, service: &'a ServiceDescription, package_root: PathBuf) -> Self {
        Self {
            root,
            service,
            package_root,
        }
    }

    pub fn locate(&self, name: &str, function: &FunctionDef) -> ArtifactSource {
        if let Some(artifact) = function.package.artifact.as_deref() {
            return self.explicit(artifact);
        }
        if function.package.individually || self.service.package.individually {
            return ArtifactSource::Path(self.package_root.join(format!("{name}.zip")));
        }
        match self.service.package.artifact.as_deref() {
            Some(artifact) => self.explicit(artifact),
            None => ArtifactSource::Path(
                self.package_root
                    .join(format!("{}.zip", self.service.service)),
            ),
        }
    }

    fn explicit(&self, artifact: &str) -> ArtifactSource {
        if artifact == TEARDOWN_ARTIFACT {
            return ArtifactSource::Teardown;
        }
        let path = Path::new(artifact);
        if path.is_absolute() {
            ArtifactSource::Path(path.to_path_buf())
        } else {
            ArtifactSource::Path(self.root.join(path))
        }
    }
}
