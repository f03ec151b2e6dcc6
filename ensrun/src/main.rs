use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use enscore::run::descriptor::{ResponseBox, RunDescriptor, DEFAULT_RESPONSE_HOUR, DEFAULT_SENSITIVITY_HOUR};
use enscore::run::method::SubsetMethod;
use enscore::run::response::ResponseFunction;
use enscore::run::time::RunInit;
use tracing::error;
use tracing_subscriber::EnvFilter;

use ensrun::config::EnsembleConfig;
use ensrun::data::infile::SensInputDescriptor;
use ensrun::data::reader::JsonFieldReader;
use ensrun::data::registry::RunRegistry;
use ensrun::derive::backend::ArtifactKind;
use ensrun::derive::command::CommandBackend;
use ensrun::error::{DerivationError, Result};
use ensrun::session::prepare::prepare_run;
use ensrun::session::subsetting::SubsettingSession;

#[derive(Parser, Debug)]
#[command(name = "ensrun", about = "Sensitivity-based ensemble subsetting")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the ensemble subset for a run
    Subset {
        #[command(flatten)]
        run: RunArgs,
        /// Subset size, defaults to the configured size
        #[arg(long)]
        size: Option<usize>,
        /// point, weight or percent (or 1-3)
        #[arg(long)]
        method: Option<String>,
        /// Verify against this analysis file instead of the run's own
        #[arg(long)]
        analysis: Option<PathBuf>,
        /// Also compute subset probabilities
        #[arg(long)]
        probs: bool,
    },
    /// Compute probabilities for the full ensemble or given members
    Probs {
        #[command(flatten)]
        run: RunArgs,
        /// 1-based members, comma separated; the full ensemble if omitted
        #[arg(long, value_delimiter = ',')]
        members: Vec<usize>,
    },
    /// Rename member output and derive mean fields, sensitivity and member values
    Prepare {
        #[command(flatten)]
        run: RunArgs,
        /// Rerun steps whose artifacts already exist
        #[arg(long)]
        force: bool,
        /// Add the run to the run-date registry afterwards
        #[arg(long)]
        register: bool,
    },
    /// Add a run to the run-date registry
    Register {
        #[arg(long)]
        run: Option<RunInit>,
    },
    /// List recent runs, newest first
    Runs {
        #[arg(long, default_value_t = 3)]
        count: usize,
        /// List the expected cycle times instead of the registry
        #[arg(long)]
        expected: bool,
    },
    /// Write the sensitivity input file for a run
    Infile {
        #[command(flatten)]
        run: RunArgs,
        /// Print instead of writing esens.in
        #[arg(long)]
        print: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Run initialization time, YYYYMMDDHH; the latest cycle if omitted
    #[arg(long)]
    run: Option<RunInit>,
    /// Response function name or code (1-6)
    #[arg(long)]
    response: Option<ResponseFunction>,
    #[arg(long, allow_negative_numbers = true)]
    lower_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    upper_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lower_lon: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    upper_lon: Option<f64>,
    #[arg(long, default_value_t = DEFAULT_SENSITIVITY_HOUR)]
    sensitivity_hour: u32,
    #[arg(long, default_value_t = DEFAULT_RESPONSE_HOUR)]
    response_hour: u32,
}

impl RunArgs {
    fn descriptor(&self, config: &EnsembleConfig) -> Result<RunDescriptor> {
        let default_box = ResponseBox::default();
        let response_box = ResponseBox::new(
            self.lower_lat.unwrap_or(default_box.lower_lat),
            self.upper_lat.unwrap_or(default_box.upper_lat),
            self.lower_lon.unwrap_or(default_box.lower_lon),
            self.upper_lon.unwrap_or(default_box.upper_lon),
        )?;
        let descriptor = config
            .descriptor(Utc::now(), self.run)
            .response(self.response.unwrap_or_default())
            .response_box(response_box)
            .lead_times(self.sensitivity_hour, self.response_hour)
            .build()?;
        Ok(descriptor)
    }
}

fn session(config: &EnsembleConfig, descriptor: RunDescriptor, size: Option<usize>, method: SubsetMethod) -> Result<SubsettingSession<CommandBackend>> {
    let backend = CommandBackend::new(config.executables.clone());
    let session = SubsettingSession::new(
        descriptor,
        size.unwrap_or(config.subset_size),
        method,
        backend,
        JsonFieldReader,
    )?;
    Ok(session)
}

fn run(cli: Cli) -> Result<()> {
    let config = EnsembleConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Subset {
            run,
            size,
            method,
            analysis,
            probs,
        } => {
            let method = config.resolve_method(method.as_deref())?;
            let mut session = session(&config, run.descriptor(&config)?, size, method)?;
            if let Some(path) = analysis {
                session.set_analysis_path(path);
            }
            println!("{}", session);

            let selection = session.compute_subset()?;
            println!("variables: {}", selection.variables.join(", "));
            println!(
                "members: {}",
                selection.members.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(",")
            );
            if probs {
                let output = session.compute_subset_probabilities()?;
                println!("probabilities: {}", output.display());
            }
        }
        Command::Probs { run, members } => {
            let mut session = session(&config, run.descriptor(&config)?, None, config.method()?)?;
            let output = if members.is_empty() {
                session.compute_full_probabilities()?
            } else {
                session.compute_probabilities(&members)?
            };
            println!("probabilities: {}", output.display());
        }
        Command::Prepare { run, force, register } => {
            let descriptor = run.descriptor(&config)?;
            let backend = CommandBackend::new(config.executables.clone());
            let summary = prepare_run(&descriptor, &backend, force)?;
            println!("{:?}", summary);
            if register {
                RunRegistry::new(config.registry_path()).append(descriptor.run())?;
            }
        }
        Command::Register { run } => {
            let run = run.unwrap_or_else(|| RunInit::most_recent(Utc::now()));
            let registry = RunRegistry::new(config.registry_path());
            if registry.append(run)? {
                println!("registered {}", run);
            } else {
                println!("{} already registered", run);
            }
        }
        Command::Runs { count, expected } => {
            let runs = if expected {
                RunInit::recent(Utc::now(), count)
            } else {
                RunRegistry::new(config.registry_path()).recent(count)?
            };
            for run in runs {
                println!("{}", run.stamp());
            }
        }
        Command::Infile { run, print } => {
            let descriptor = run.descriptor(&config)?;
            let infile = SensInputDescriptor::from_descriptor(&descriptor, true);
            if print {
                print!("{}", infile.render());
            } else {
                let path = &descriptor.paths().sens_infile;
                infile
                    .write(path)
                    .map_err(DerivationError::io(ArtifactKind::InputDescriptor, path))?;
                println!("wrote {}", path.display());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "ensrun failed");
            ExitCode::FAILURE
        }
    }
}
