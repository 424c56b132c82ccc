use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use slawatch::config::Config;
use slawatch::export::{ExportFormat, ExportKind, Rendered, DEFAULT_EXPORT_LIMIT};
use slawatch::features::FeatureVector;
use slawatch::ml::SlaPredictor;
use slawatch::storage::telemetry::{self, TelemetryFilter};
use slawatch::train::TrainOptions;

#[derive(Parser)]
#[command(
    name = "slawatch",
    about = "SLA violation prediction and anomaly detection for network telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (overrides SLAWATCH_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Train all models from a telemetry CSV and write artifacts
    Train {
        /// Input CSV with the six feature columns
        #[arg(long)]
        data: PathBuf,

        /// Artifact directory (defaults to models.dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Version string stamped on the artifacts
        #[arg(long, default_value = "v1.0")]
        model_version: String,

        /// RNG seed for splits and ensembles
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Tune the boosted candidate with cross-validated grid search
        #[arg(long)]
        grid_search: bool,
    },

    /// Score one feature vector
    Predict {
        #[arg(long)]
        bandwidth: f64,
        #[arg(long)]
        throughput: f64,
        #[arg(long)]
        congestion: f64,
        #[arg(long)]
        packet_loss: f64,
        #[arg(long)]
        latency: f64,
        #[arg(long)]
        jitter: f64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show which models load from the artifact directory
    Models,

    /// Export stored telemetry
    Export {
        /// sla-metrics or bandwidth-usage
        kind: String,

        /// csv or json
        #[arg(long, default_value = "csv")]
        format: String,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Maximum rows
        #[arg(long, default_value_t = DEFAULT_EXPORT_LIMIT)]
        limit: u32,
    },

    /// Delete telemetry older than N days
    Prune {
        #[arg(long)]
        days: u32,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => {
            let mut cfg = Config::load(p)?;
            cfg.apply_env(|key| std::env::var(key).ok());
            Ok(cfg)
        }
        None => Ok(Config::load_or_default()),
    }
}

fn predictor(cfg: &Config) -> SlaPredictor {
    let p = SlaPredictor::new(
        cfg.models.dir.clone(),
        cfg.models.scoring.clone(),
        cfg.models.fallback.clone(),
    );
    p.load();
    p
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_ref())?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(bind = %cfg.server.bind, "Starting slawatch daemon");
            slawatch::serve(cfg).await?;
        }
        Commands::Train {
            data,
            model_dir,
            model_version,
            seed,
            grid_search,
        } => {
            let model_dir = model_dir.unwrap_or_else(|| cfg.models.dir.clone());
            let opts = TrainOptions {
                model_version,
                seed,
                grid_search,
                ..Default::default()
            };
            let report = tokio::task::spawn_blocking(move || slawatch::train::run(&data, &model_dir, &opts))
                .await
                .context("training task failed")??;

            println!("\nslawatch Training Report");
            println!("{:<22} : {}", "Model version", report.model_version);
            println!("{:<22} : {}", "Records", report.records);
            println!("{:<22} : {} / {}", "Train / test rows", report.train_rows, report.test_rows);
            println!("{:<22} : {:.1}%", "Violation rate", report.violation_rate * 100.0);
            for c in &report.candidates {
                println!("{:<22} : AUC {:.4}", c.family, c.auc);
            }
            println!("{:<22} : {}", "Selected", report.chosen_family);
            if let Some(gs) = &report.grid_search {
                println!(
                    "{:<22} : {} combinations, best CV AUC {:.4}",
                    "Grid search", gs.evaluated, gs.best_cv_auc
                );
            }
            println!();
        }
        Commands::Predict {
            bandwidth,
            throughput,
            congestion,
            packet_loss,
            latency,
            jitter,
            json,
        } => {
            let v = FeatureVector::new(bandwidth, throughput, congestion, packet_loss, latency, jitter);
            let p = predictor(&cfg);
            let risk = p.predict_risk(&v)?;
            let anomaly = p.detect_anomaly(&v)?;
            let explanation = p.explain(&v)?;

            if json {
                let out = serde_json::json!({
                    "risk": risk,
                    "risk_level": slawatch::api::risk_level(risk.probability),
                    "anomaly": anomaly,
                    "severity": slawatch::api::severity(anomaly.score),
                    "explanation": explanation,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("\n=== slawatch Prediction ===");
                println!(
                    "SLA violation: {} (p={:.3}, confidence {:.2}, risk {})",
                    if risk.label { "YES" } else { "no" },
                    risk.probability,
                    risk.confidence,
                    slawatch::api::risk_level(risk.probability)
                );
                println!("Model:         {}", risk.model_version);
                println!(
                    "Anomaly:       {} (score {:.3}, severity {})",
                    if anomaly.is_anomaly { "YES" } else { "no" },
                    anomaly.score,
                    slawatch::api::severity(anomaly.score)
                );
                println!("               {}", anomaly.explanation);
                println!("\nContributions (base {:.4}):", explanation.base_value);
                for (name, value) in &explanation.per_feature_contribution {
                    println!(" - {:<12} {:+.4}", name, value);
                }
                println!("===========================\n");
            }
        }
        Commands::Models => {
            let p = predictor(&cfg);
            let inventory = p.describe_loaded_models();
            println!("{}", serde_json::to_string_pretty(&inventory)?);
        }
        Commands::Export {
            kind,
            format,
            output,
            limit,
        } => {
            let kind: ExportKind = kind.parse()?;
            let format: ExportFormat = format.parse()?;
            let pool = slawatch::storage::open_pool(&cfg.storage.db_path, 1)?;
            let conn = pool.get()?;
            let filter = TelemetryFilter {
                limit: Some(limit),
                ..Default::default()
            };
            let records = telemetry::list(&conn, &filter)?;
            let body = match slawatch::export::render(kind, format, &records, chrono::Utc::now())? {
                Rendered::Csv { data, .. } => data,
                Rendered::Json(value) => serde_json::to_string_pretty(&value)?,
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, body)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), rows = records.len(), "export written");
                }
                None => print!("{}", body),
            }
        }
        Commands::Prune { days } => {
            let pool = slawatch::storage::open_pool(&cfg.storage.db_path, 1)?;
            let conn = pool.get()?;
            let deleted = telemetry::delete_older_than(&conn, days, chrono::Utc::now())?;
            println!("Deleted {} telemetry records older than {} days.", deleted, days);
        }
    }

    Ok(())
}
