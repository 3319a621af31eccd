use crate::config::ConfigResolver;
use crate::CoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use stratus_remote::AccountInfo;
use stratus_schema::{DeploymentTarget, ASSEMBLY_DIR};

/// The deployment target and derived locations of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub target: DeploymentTarget,
    pub stack_name: String,
    pub stack_tags: BTreeMap<String, String>,
    /// Where synthesized templates are written.
    pub outdir: PathBuf,
    pub build_config_path: PathBuf,
}

impl EnvironmentContext {
    /// Resolve the context. `default_account` is called only when the account
    /// id or the partition is not configured explicitly.
    pub fn resolve(
        resolver: &ConfigResolver<'_>,
        default_account: impl FnOnce() -> Result<AccountInfo, CoreError>,
    ) -> Result<Self, CoreError> {
        let stage = resolver.stage();
        let region = resolver.region();
        let (account_id, partition) = match (resolver.account_id(), resolver.partition()) {
            (Some(account_id), Some(partition)) => (account_id, partition),
            (account_id, partition) => {
                let info = default_account()?;
                (
                    account_id.unwrap_or(info.account_id),
                    partition.unwrap_or(info.partition),
                )
            }
        };

        Ok(Self {
            target: DeploymentTarget {
                stage,
                region,
                account_id,
                partition,
            },
            stack_name: resolver.stack_name(),
            stack_tags: resolver.stack_tags(),
            outdir: resolver.root().join(ASSEMBLY_DIR),
            build_config_path: resolver.build_config_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InvocationOptions, SessionConfig};
    use std::cell::Cell;
    use std::path::Path;
    use stratus_remote::RemoteError;
    use stratus_schema::parse_service_str;

    fn lookup_account() -> Result<AccountInfo, CoreError> {
        Ok(AccountInfo {
            account_id: "210987654321".to_owned(),
            partition: "aws-cn".to_owned(),
        })
    }

    #[test]
    fn explicit_account_skips_lookup() {
        let svc = parse_service_str(
            r#"
service = "orders"
[provider]
account_id = "123456789012"
partition = "aws"
"#,
        )
        .unwrap();
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let resolver = ConfigResolver::new(Path::new("/srv/orders"), &svc, &options, &session);

        let called = Cell::new(false);
        let ctx = EnvironmentContext::resolve(&resolver, || {
            called.set(true);
            lookup_account()
        })
        .unwrap();

        assert!(!called.get());
        assert_eq!(ctx.target.account_id, "123456789012");
        assert_eq!(ctx.target.partition, "aws");
        assert_eq!(ctx.target.stage, "dev");
        assert_eq!(ctx.stack_name, "orders-dev");
        assert_eq!(ctx.outdir, PathBuf::from("/srv/orders/.stratus-assembly"));
    }

    #[test]
    fn missing_partition_is_filled_from_lookup() {
        let svc = parse_service_str(
            r#"
service = "orders"
[provider]
account_id = "123456789012"
"#,
        )
        .unwrap();
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let resolver = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);

        let ctx = EnvironmentContext::resolve(&resolver, lookup_account).unwrap();
        assert_eq!(ctx.target.account_id, "123456789012");
        assert_eq!(ctx.target.partition, "aws-cn");
    }

    #[test]
    fn lookup_failure_propagates_as_remote_error() {
        let svc = parse_service_str("service = \"orders\"\n").unwrap();
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let resolver = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);

        let err = EnvironmentContext::resolve(&resolver, || {
            Err(RemoteError::Credentials("no credentials".to_owned()).into())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Remote(RemoteError::Credentials(_))
        ));
    }
}
