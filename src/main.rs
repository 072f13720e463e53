//! diffit CLI entry point.
//!
//! Every command prints its result as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use diffit::application::ports::BlobStore;
use diffit::application::{
    Catalog, ComparisonSettings, DiffOrchestrator, ReviewStateMachine, SnapshotProcessor,
    SnapshotUpload, compare_trees,
};
use diffit::domain::{
    BuildStatus, DomainError, NewBuild, NewProject, NewSnapshot, Pagination, ProjectUpdate,
    ReviewDecision, ReviewStatus, VariantKey,
};
use diffit::infra::app_config::{AppConfig, load_config};
use diffit::infra::db::{Database, SnapshotFilter};
use diffit::infra::image::{ImageCodec, PixelComparator};
use diffit::infra::storage::FsBlobStore;

#[derive(Parser, Debug)]
#[command(name = "diffit")]
#[command(version)]
#[command(about = "Visual regression snapshots, baselines and reviews", long_about = None)]
struct Cli {
    /// Override the per-pixel comparison threshold (0.0 - 1.0)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
}

impl From<PageArgs> for Pagination {
    fn from(args: PageArgs) -> Self {
        Pagination::new(args.page, args.per_page)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare two screenshot directory trees
    CompareDirs {
        base: PathBuf,
        feature: PathBuf,
        /// Where diff images are written, mirroring the tree layout
        #[arg(long, default_value = "diff")]
        diff_dir: PathBuf,
    },

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage builds
    #[command(subcommand)]
    Build(BuildCommand),

    /// Upload and inspect snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Approve or reject one snapshot
    Review {
        snapshot: String,
        /// approve or reject
        #[arg(long)]
        status: ReviewStatus,
        #[arg(long)]
        by: String,
    },

    /// Approve or reject many snapshots at once
    BatchReview {
        #[arg(required = true)]
        snapshots: Vec<String>,
        #[arg(long)]
        status: ReviewStatus,
        #[arg(long)]
        by: String,
    },

    /// Manage baselines directly
    #[command(subcommand)]
    Baseline(BaselineCommand),
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    Create {
        name: String,
        slug: String,
        #[arg(long)]
        repository_url: Option<String>,
        #[arg(long)]
        default_branch: Option<String>,
    },
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Show a project by id or slug
    Show { project: String },
    SetDefaultBranch { project: String, branch: String },
    Delete { project: String },
}

#[derive(Subcommand, Debug)]
enum BuildCommand {
    Create {
        /// Project id or slug
        project: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        commit_sha: Option<String>,
        #[arg(long)]
        commit_message: Option<String>,
        #[arg(long)]
        pr: Option<u32>,
    },
    Show { build: String },
    List {
        project: String,
        #[arg(long)]
        branch: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Latest build on a branch
    Latest {
        project: String,
        #[arg(long)]
        branch: String,
    },
    /// Set a build's status (pending, processing, completed, failed)
    Status { build: String, status: BuildStatus },
    /// Recompute counters and mark the build completed
    Finalize { build: String },
    Delete { build: String },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Upload one or more images into a build
    Upload {
        build: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Snapshot name (single file only; defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        browser: Option<String>,
        #[arg(long)]
        viewport: Option<String>,
    },
    Show { snapshot: String },
    List {
        build: String,
        #[arg(long)]
        review_status: Option<ReviewStatus>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Snapshots with a diff or without a baseline
    Changed { build: String },
    Delete { snapshot: String },
}

#[derive(Subcommand, Debug)]
enum BaselineCommand {
    Upload {
        project: String,
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        browser: Option<String>,
        #[arg(long)]
        viewport: Option<String>,
    },
    Show { baseline: String },
    List {
        project: String,
        #[arg(long)]
        branch: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    Delete { baseline: String },
}

struct App {
    catalog: Catalog,
    processor: SnapshotProcessor,
    reviews: ReviewStateMachine,
    diff: DiffOrchestrator,
    settings: ComparisonSettings,
}

impl App {
    fn open(config: &AppConfig, threshold: Option<f64>) -> Result<Self> {
        let db = Database::open_at(&config.database_path).with_context(|| {
            format!("Failed to open database at {}", config.database_path.display())
        })?;
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.storage_path)?);
        let codec = Arc::new(ImageCodec);
        let diff = DiffOrchestrator::new(
            codec.clone(),
            Arc::new(PixelComparator),
            codec.clone(),
            blobs.clone(),
        );

        let threshold = threshold.unwrap_or(config.threshold);
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("threshold must be between 0 and 1, got {threshold}");
        }
        let settings = ComparisonSettings {
            threshold,
            timeout: Duration::from_secs(config.comparison_timeout_secs),
            max_concurrency: config.max_concurrent_comparisons,
        };

        Ok(Self {
            catalog: Catalog::new(db.clone(), blobs.clone(), codec, config.default_branch.clone()),
            processor: SnapshotProcessor::new(db.clone(), blobs.clone(), diff.clone(), settings),
            reviews: ReviewStateMachine::new(db, blobs),
            diff,
            settings,
        })
    }
}

fn json<T: Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value).map_err(|err| DomainError::from(err.to_string()))
}

fn read_image(path: &Path) -> Result<Vec<u8>, DomainError> {
    std::fs::read(path)
        .map_err(|err| DomainError::from(format!("Failed to read {}: {err}", path.display())))
}

fn snapshot_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn run(app: &App, command: Commands) -> Result<serde_json::Value, DomainError> {
    match command {
        Commands::CompareDirs {
            base,
            feature,
            diff_dir,
        } => {
            let report = compare_trees(&app.diff, &base, &feature, &diff_dir, &app.settings).await?;
            json(&report)
        }
        Commands::Project(command) => run_project(app, command),
        Commands::Build(command) => run_build(app, command),
        Commands::Snapshot(command) => run_snapshot(app, command).await,
        Commands::Review { snapshot, status, by } => {
            let decision = ReviewDecision {
                status,
                reviewed_by: by,
            };
            json(&app.reviews.review(&snapshot, &decision)?)
        }
        Commands::BatchReview {
            snapshots,
            status,
            by,
        } => {
            let decision = ReviewDecision {
                status,
                reviewed_by: by,
            };
            json(&app.reviews.batch_review(&snapshots, &decision)?)
        }
        Commands::Baseline(command) => run_baseline(app, command),
    }
}

fn run_project(app: &App, command: ProjectCommand) -> Result<serde_json::Value, DomainError> {
    let catalog = &app.catalog;
    match command {
        ProjectCommand::Create {
            name,
            slug,
            repository_url,
            default_branch,
        } => json(&catalog.create_project(NewProject {
            name,
            slug,
            repository_url,
            default_branch,
        })?),
        ProjectCommand::List { page } => json(&catalog.list_projects(page.into())?),
        ProjectCommand::Show { project } => json(&catalog.find_project(&project)?),
        ProjectCommand::SetDefaultBranch { project, branch } => {
            let project = catalog.find_project(&project)?;
            let update = ProjectUpdate {
                default_branch: Some(branch),
                ..ProjectUpdate::default()
            };
            json(&catalog.update_project(&project.id, update)?)
        }
        ProjectCommand::Delete { project } => {
            let project = catalog.find_project(&project)?;
            catalog.delete_project(&project.id)?;
            json(&serde_json::json!({ "deleted": project.id }))
        }
    }
}

fn run_build(app: &App, command: BuildCommand) -> Result<serde_json::Value, DomainError> {
    let catalog = &app.catalog;
    match command {
        BuildCommand::Create {
            project,
            branch,
            commit_sha,
            commit_message,
            pr,
        } => {
            let project = catalog.find_project(&project)?;
            json(&catalog.create_build(NewBuild {
                project_id: project.id,
                branch,
                commit_sha,
                commit_message,
                pull_request_number: pr,
            })?)
        }
        BuildCommand::Show { build } => json(&catalog.build(&build)?),
        BuildCommand::List {
            project,
            branch,
            page,
        } => {
            let project = catalog.find_project(&project)?;
            match branch {
                Some(branch) => {
                    json(&catalog.list_builds_by_branch(&project.id, &branch, page.into())?)
                }
                None => json(&catalog.list_builds(&project.id, page.into())?),
            }
        }
        BuildCommand::Latest { project, branch } => {
            let project = catalog.find_project(&project)?;
            json(&catalog.latest_build(&project.id, &branch)?)
        }
        BuildCommand::Status { build, status } => {
            json(&catalog.update_build_status(&build, status)?)
        }
        BuildCommand::Finalize { build } => json(&catalog.finalize_build(&build)?),
        BuildCommand::Delete { build } => {
            catalog.delete_build(&build)?;
            json(&serde_json::json!({ "deleted": build }))
        }
    }
}

async fn run_snapshot(app: &App, command: SnapshotCommand) -> Result<serde_json::Value, DomainError> {
    let catalog = &app.catalog;
    match command {
        SnapshotCommand::Upload {
            build,
            files,
            name,
            browser,
            viewport,
        } => {
            if name.is_some() && files.len() > 1 {
                return Err("--name can only be used with a single file".into());
            }

            let mut uploads = Vec::with_capacity(files.len());
            for file in &files {
                uploads.push(SnapshotUpload {
                    snapshot: NewSnapshot {
                        name: name.clone().unwrap_or_else(|| snapshot_name(file)),
                        browser: browser.clone(),
                        viewport: viewport.clone(),
                        ..NewSnapshot::default()
                    },
                    image: Some(read_image(file)?),
                });
            }

            if uploads.len() == 1 {
                let upload = uploads.remove(0);
                return json(&app.processor.ingest(&build, upload).await?);
            }

            let results = app.processor.ingest_batch(&build, uploads).await?;
            let entries: Vec<serde_json::Value> = files
                .iter()
                .zip(results)
                .map(|(file, result)| match result {
                    Ok(snapshot) => serde_json::json!({ "file": file, "snapshot": snapshot }),
                    Err(err) => serde_json::json!({ "file": file, "error": err.to_string() }),
                })
                .collect();
            Ok(serde_json::Value::Array(entries))
        }
        SnapshotCommand::Show { snapshot } => json(&catalog.snapshot(&snapshot)?),
        SnapshotCommand::List {
            build,
            review_status,
            page,
        } => json(&catalog.list_snapshots(&build, SnapshotFilter { review_status }, page.into())?),
        SnapshotCommand::Changed { build } => json(&catalog.changed_snapshots(&build)?),
        SnapshotCommand::Delete { snapshot } => {
            catalog.delete_snapshot(&snapshot)?;
            json(&serde_json::json!({ "deleted": snapshot }))
        }
    }
}

fn run_baseline(app: &App, command: BaselineCommand) -> Result<serde_json::Value, DomainError> {
    let catalog = &app.catalog;
    match command {
        BaselineCommand::Upload {
            project,
            file,
            name,
            branch,
            browser,
            viewport,
        } => {
            let project = catalog.find_project(&project)?;
            let branch = branch.unwrap_or_else(|| project.default_branch.clone());
            let key = VariantKey::new(project.id, name, branch, browser, viewport);
            json(&catalog.upload_baseline(key, &read_image(&file)?)?)
        }
        BaselineCommand::Show { baseline } => json(&catalog.baseline(&baseline)?),
        BaselineCommand::List {
            project,
            branch,
            page,
        } => {
            let project = catalog.find_project(&project)?;
            json(&catalog.list_baselines(&project.id, branch.as_deref(), page.into())?)
        }
        BaselineCommand::Delete { baseline } => {
            catalog.delete_baseline(&baseline)?;
            json(&serde_json::json!({ "deleted": baseline }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config();
    let app = App::open(&config, cli.threshold)?;

    let output = run(&app, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
