#![forbid(unsafe_code)]

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use buildrules_config::auth::AuthFile;
use buildrules_config::conda::CondaConfig;
use buildrules_config::image::ImageConfig;
use buildrules_config::settings::{expand_root, TARGETS_FILE};
use buildrules_config::{BuilderPaths, Settings, StateStore};
use buildrules_engine::{generate_plan, CondaBuilder, PlannedRun, SingularityBuilder};
use buildrules_rule::Plan;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "buildrules",
    about = "Build and deploy scientific software environments from declarative configuration"
)]
#[command(version)]
struct Cli {
    /// Log rule details and fingerprints
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build every target declared in a configuration folder
    Build {
        /// Which builder reads the folder
        #[arg(value_enum)]
        builder: Builder,
        /// Folder holding config.toml and build_config.toml
        conf: PathBuf,
        /// Install root substituted for `$root` (overrides `root` in config.toml)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Print the plan without executing it
        #[arg(long)]
        describe: bool,
        /// Skip the deployments declared in config.toml
        #[arg(long)]
        no_deploy: bool,
    },
    /// Run only the deployments declared in a configuration folder
    Deploy {
        /// Folder holding config.toml
        conf: PathBuf,
        /// Install root substituted for `$root` (overrides `root` in config.toml)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Print the plan without executing it
        #[arg(long)]
        describe: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Builder {
    /// Conda environments
    Conda,
    /// Singularity images
    Singularity,
}

impl Builder {
    fn tool(self) -> &'static str {
        match self {
            Builder::Conda => "conda",
            Builder::Singularity => "singularity",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Build {
            builder,
            conf,
            root,
            describe,
            no_deploy,
        } => cmd_build(builder, &conf, root, describe, no_deploy),
        Command::Deploy {
            conf,
            root,
            describe,
        } => cmd_deploy(&conf, root, describe),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// The `--root` flag, else `root` from config.toml, else the current directory.
fn install_root(flag: Option<PathBuf>, settings: &Settings) -> Result<PathBuf, Box<dyn Error>> {
    match flag.or_else(|| settings.root.clone()) {
        Some(root) => Ok(root),
        None => Ok(std::env::current_dir()?),
    }
}

/// Expand `$root` in every string value of the deployment declarations.
fn expand_deployments(settings: &Settings, root: &Path) -> Vec<toml::Table> {
    settings
        .deployment
        .iter()
        .map(|table| {
            table
                .iter()
                .map(|(key, value)| {
                    let value = match value.as_str() {
                        Some(text) if text.starts_with("$root") => {
                            toml::Value::String(expand_root(text, root).display().to_string())
                        }
                        _ => value.clone(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// `/usr` entries of the caller's `PATH`, handed to conda processes.
fn host_path() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path)
                .filter(|p| p.starts_with("/usr"))
                .collect()
        })
        .unwrap_or_default()
}

fn auth_file(settings: &Settings) -> Result<AuthFile, Box<dyn Error>> {
    let path = match &settings.options.auth_file {
        Some(path) => path.clone(),
        None => buildrules_util::fs::buildrules_home()?.join("auths.toml"),
    };
    Ok(AuthFile::from_path(&path)?)
}

fn build_plan(
    builder: Builder,
    conf: &Path,
    settings: &Settings,
    root: &Path,
) -> Result<PlannedRun, Box<dyn Error>> {
    let paths = BuilderPaths::resolve(builder.tool(), root, &settings.paths);
    let targets = conf.join(TARGETS_FILE);
    let planned = match builder {
        Builder::Conda => {
            let config = CondaConfig::from_path(&targets)?;
            let conda = CondaBuilder::new(config, paths, settings.options.clone(), host_path());
            let store = StateStore::new(conda.state_path());
            generate_plan(&conda, &store)?
        }
        Builder::Singularity => {
            let config = ImageConfig::from_path(&targets)?;
            let uid = nix::unistd::getuid().as_raw();
            let images = SingularityBuilder::new(
                &config,
                paths,
                settings.options.clone(),
                auth_file(settings)?,
                uid,
            )?;
            let store = StateStore::new(images.state_path());
            generate_plan(&images, &store)?
        }
    };
    Ok(planned)
}

fn cmd_build(
    builder: Builder,
    conf: &Path,
    root: Option<PathBuf>,
    describe: bool,
    no_deploy: bool,
) -> CliResult {
    let settings = Settings::from_dir(conf)?;
    let root = install_root(root, &settings)?;

    let PlannedRun { mut plan, targets } = build_plan(builder, conf, &settings, &root)?;
    if !no_deploy {
        let deployments = expand_deployments(&settings, &root);
        plan.append(buildrules_deploy::deployment_plan(&deployments)?);
    }

    for (identifier, classification) in &targets {
        info!(id = %identifier, %classification, "planned");
    }
    execute(&plan, describe)
}

fn cmd_deploy(conf: &Path, root: Option<PathBuf>, describe: bool) -> CliResult {
    let settings = Settings::from_dir(conf)?;
    let root = install_root(root, &settings)?;
    let deployments = expand_deployments(&settings, &root);
    if deployments.is_empty() {
        eprintln!("no deployments declared in {}", conf.display());
        return Ok(());
    }
    let plan = buildrules_deploy::deployment_plan(&deployments)?;
    execute(&plan, describe)
}

fn execute(plan: &Plan, describe: bool) -> CliResult {
    if describe {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        buildrules_rule::describe(plan, &mut out)?;
        out.flush()?;
        return Ok(());
    }
    let summary = buildrules_rule::run(plan)?;
    info!(rules = summary.executed, "done");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_build() {
        let cli = Cli::try_parse_from(["buildrules", "build", "conda", "conf"]).unwrap();
        match cli.command {
            Command::Build {
                builder,
                conf,
                root,
                describe,
                no_deploy,
            } => {
                assert_eq!(builder, Builder::Conda);
                assert_eq!(conf, Path::new("conf"));
                assert!(root.is_none());
                assert!(!describe);
                assert!(!no_deploy);
            }
            other => panic!("expected Build, got {other:?}"),
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_build_flags() {
        let cli = Cli::try_parse_from([
            "buildrules",
            "build",
            "singularity",
            "conf",
            "--root",
            "/srv",
            "--describe",
            "--no-deploy",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Build {
                builder,
                root,
                describe,
                no_deploy,
                ..
            } => {
                assert_eq!(builder, Builder::Singularity);
                assert_eq!(root.as_deref(), Some(Path::new("/srv")));
                assert!(describe);
                assert!(no_deploy);
            }
            other => panic!("expected Build, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_builder_fails() {
        let err = Cli::try_parse_from(["buildrules", "build", "spack", "conf"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn parse_deploy() {
        let cli = Cli::try_parse_from(["buildrules", "--verbose", "deploy", "conf", "--describe"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Deploy { conf, describe, .. } => {
                assert_eq!(conf, Path::new("conf"));
                assert!(describe);
            }
            other => panic!("expected Deploy, got {other:?}"),
        }
    }

    #[test]
    fn missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["buildrules"]).is_err());
    }

    #[test]
    fn root_precedence() {
        let settings = Settings {
            root: Some(PathBuf::from("/from/config")),
            ..Settings::default()
        };
        assert_eq!(
            install_root(Some(PathBuf::from("/from/flag")), &settings).unwrap(),
            Path::new("/from/flag")
        );
        assert_eq!(
            install_root(None, &settings).unwrap(),
            Path::new("/from/config")
        );
        assert_eq!(
            install_root(None, &Settings::default()).unwrap(),
            std::env::current_dir().unwrap()
        );
    }

    #[test]
    fn deployments_expand_root() {
        let settings: Settings = buildrules_config::document::parse(
            "[[deployment]]\nmethod = \"rsync\"\ntarget_host = \"h\"\nsource = \"$root/opt\"\ndest = \"/appl/opt\"\ndelete = true\n",
            Path::new("config.toml"),
        )
        .unwrap();
        let tables = expand_deployments(&settings, Path::new("/srv"));
        let table = tables.first().unwrap();
        assert_eq!(table.get("source").and_then(toml::Value::as_str), Some("/srv/opt"));
        assert_eq!(table.get("dest").and_then(toml::Value::as_str), Some("/appl/opt"));
        assert_eq!(table.get("delete").and_then(toml::Value::as_bool), Some(true));
    }

    #[test]
    fn describe_conda_plan_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = tmp.path().join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(
            conf.join(TARGETS_FILE),
            "[[environments]]\nname = \"tools\"\nversion = \"1.0\"\npackages = [\"numpy\"]\n",
        )
        .unwrap();
        let settings = Settings::from_dir(&conf).unwrap();
        let root = tmp.path().join("root");

        let planned = build_plan(Builder::Conda, &conf, &settings, &root).unwrap();
        assert_eq!(planned.targets.len(), 1);
        let mut out = Vec::new();
        buildrules_rule::describe(&planned.plan, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("fetch-installer: https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh"));
        assert!(text.contains("record-state: tools/1.0"));
        // Describing executes nothing.
        assert!(!root.exists());
    }

    #[test]
    fn invalid_targets_abort_before_planning() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = tmp.path().join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(
            conf.join(TARGETS_FILE),
            "[[environments]]\nname = \"tools\"\nversion = \"1.0\"\nchannels = [\"conda-forge\"]\n",
        )
        .unwrap();
        let settings = Settings::from_dir(&conf).unwrap();
        let err = build_plan(Builder::Conda, &conf, &settings, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("invalid"), "got {err}");
    }
}
