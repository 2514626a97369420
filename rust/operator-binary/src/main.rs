use std::time::Duration;

use clap::{crate_description, crate_version, Parser};
use stackable_cert_operator::{
    config::{ControllerConfig, DEFAULT_KEY_STRENGTH, MIN_KEY_STRENGTH},
    controller,
    crd::CertificateRequest,
    duration,
};
use stackable_operator::{logging::TracingTarget, namespace::WatchNamespace, CustomResourceExt};

pub const APP_NAME: &str = "cert";

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<CertOperatorRun>,
}

#[derive(clap::Parser)]
struct CertOperatorRun {
    /// Only watch CertificateRequests in this namespace (all namespaces if empty)
    #[arg(long, env, default_value = "")]
    watch_namespace: WatchNamespace,

    /// Renew certificates once they have less than this much validity left, such as `30d` or `720h`
    #[arg(long, env, default_value = "30d", value_parser = duration::parse)]
    renewal_threshold: Duration,

    /// Size of generated RSA keys, in bits
    #[arg(
        long,
        env,
        default_value_t = DEFAULT_KEY_STRENGTH,
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_KEY_STRENGTH)..),
    )]
    key_strength: u32,

    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET: Option<&str> = option_env!("TARGET");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        stackable_operator::cli::Command::Crd => {
            CertificateRequest::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        stackable_operator::cli::Command::Run(CertOperatorRun {
            watch_namespace,
            renewal_threshold,
            key_strength,
            tracing_target,
        }) => {
            stackable_operator::logging::initialize_logging(
                "CERT_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let config = ControllerConfig {
                renewal_threshold,
                key_strength,
            };
            tracing::info!(
                renewal_threshold = %humantime::format_duration(config.renewal_threshold),
                key_strength = config.key_strength,
                "Starting CertificateRequest controller"
            );
            let client = stackable_operator::client::create_client(Some(
                "certs.stackable.tech".to_string(),
            ))
            .await?;
            controller::start(&client, config, &watch_namespace).await;
        }
    }
    Ok(())
}
