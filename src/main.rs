//! TrueCopy command-line driver.
//!
//! Pushes one or more filings through a shared signing pipeline and reports
//! the published locators. Batch inputs exercise the concurrency gate: all
//! requests are submitted at once and the gate bounds how many run.

use std::{path::PathBuf, process, sync::Arc};

use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use truecopy::{
    config::PipelineConfig,
    types::{SigningRequest, SourceLocator},
    Pipeline,
};

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let verbosity = matches.get_one::<String>("verbose").map(String::as_str);
    init_logging(verbosity.unwrap_or("info"));

    info!("TrueCopy signing pipeline starting");

    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        match load_config_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load config file: {}", e);
                process::exit(1);
            }
        }
    } else {
        PipelineConfig::default()
    };

    // CLI overrides
    if let Some(bundle) = matches.get_one::<String>("bundle") {
        config.signature.bundle_path = PathBuf::from(bundle);
    }
    if let Some(env_name) = matches.get_one::<String>("password-env") {
        config.signature.password_env = env_name.clone();
    }
    if let Some(owner) = matches.get_one::<String>("owner-password") {
        config.encryption.owner_password = owner.clone();
    }
    if let Some(output) = matches.get_one::<String>("output-dir") {
        config.publish_root = PathBuf::from(output);
    }
    if let Some(domain) = matches.get_one::<String>("domain") {
        config.watermark.domain = domain.clone();
        config.public_base = format!("https://{}/TrueCopy", domain);
    }
    if let Some(gate) = matches.get_one::<String>("gate") {
        match gate.parse::<usize>() {
            Ok(permits) => config.gate.permits = permits,
            Err(_) => {
                error!("Invalid gate size: {}", gate);
                process::exit(1);
            }
        }
    }

    let case_reference = matches.get_one::<String>("case-ref").cloned().unwrap_or_default();
    let doc_ref_override = matches.get_one::<String>("doc-ref").cloned();
    let inputs: Vec<String> = matches
        .get_many::<String>("input")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!("Pipeline initialization failed: {}", e);
            process::exit(1);
        }
    };

    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let document_reference = doc_ref_override.clone().unwrap_or_else(|| {
            PathBuf::from(&input)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string())
        });
        let request = SigningRequest::new(
            SourceLocator::Path(PathBuf::from(&input)),
            &case_reference,
            &document_reference,
        );
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move { pipeline.process(request).await }));
    }

    let mut failures = 0usize;
    for handle in handles {
        match handle.await {
            Ok(result) => {
                if result.status.is_completed() {
                    info!(
                        "Completed {} in {:.2?}: {}",
                        result.request_id,
                        result.processing_time,
                        result.output_locator.as_deref().unwrap_or("-")
                    );
                } else {
                    error!("Failed {}: {:?}", result.request_id, result.status);
                    failures += 1;
                }
            }
            Err(e) => {
                error!("Request task panicked: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!("{} request(s) failed", failures);
        process::exit(1);
    }
    info!("All requests completed");
}

fn build_cli() -> Command {
    Command::new("truecopy")
        .version("0.1.0")
        .about("Watermarks, encrypts and digitally signs court filings for publication")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Input PDF file (repeatable for batch processing)")
                .required(true),
        )
        .arg(
            Arg::new("case-ref")
                .long("case-ref")
                .value_name("REF")
                .help("Case reference used in the output filename")
                .required(true),
        )
        .arg(
            Arg::new("doc-ref")
                .long("doc-ref")
                .value_name("REF")
                .help("Document reference; defaults to the input file stem"),
        )
        .arg(
            Arg::new("bundle")
                .short('b')
                .long("bundle")
                .value_name("FILE")
                .help("PKCS#12 signing bundle"),
        )
        .arg(
            Arg::new("password-env")
                .long("password-env")
                .value_name("VAR")
                .help("Environment variable holding the bundle password"),
        )
        .arg(
            Arg::new("owner-password")
                .long("owner-password")
                .value_name("PASSWORD")
                .help("Owner password for the encrypted output"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Directory published artifacts are copied into"),
        )
        .arg(
            Arg::new("domain")
                .long("domain")
                .value_name("DOMAIN")
                .help("Public domain used in the watermark caption and link"),
        )
        .arg(
            Arg::new("gate")
                .long("gate")
                .value_name("N")
                .help("Maximum number of concurrently processed requests"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (JSON/YAML)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .value_name("LEVEL")
                .help("Logging verbosity (error/warn/info/debug/trace)"),
        )
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("truecopy={}", level)))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

fn load_config_file(path: &str) -> Result<PipelineConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    serde_json::from_str(&content)
        .or_else(|_| serde_yaml::from_str(&content))
        .map_err(|e| format!("Config parsing error: {}", e))
}
