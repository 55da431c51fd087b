//! planstore - backend-agnostic plan storage
//!
//! Command-line front end over the local JSON stores in `.planstore/`.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use planstore::backend::{load_backend, PlanBackend, StoreClients};
use planstore::consolidation;
use planstore::dedup::save_staged_plan;
use planstore::git::GitCli;
use planstore::metadata::{fields, MetadataPatch};
use planstore::persist::FileLock;
use planstore::plan::identity::{issue_branch_name, slugify};
use planstore::plan::{LifecycleStage, NewPlan, Plan, PlanId, PlanQuery, Provider};
use planstore::session::{new_session_id, FileMarkerStore};
use planstore::staging::{ContentStaging, FileContentStaging};
use planstore::store::{MemoryContainerStore, MemoryTicketTracker};
use planstore::sync::sync_branch;
use planstore::{PlanError, Result, StoreConfig};

#[derive(Parser)]
#[command(name = "planstore")]
#[command(version)]
#[command(about = "Store implementation plans in issues, draft pull requests or tickets", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Override the configured provider: issues, draft_pr or tickets
    #[arg(long, global = true)]
    provider: Option<Provider>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration to .planstore/config.toml
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Create a plan from a file, once per session and content
    Create {
        #[arg(long)]
        title: String,

        /// File holding the plan text
        #[arg(long)]
        file: PathBuf,

        /// Session id; repeating a create with the same session is a no-op
        #[arg(long)]
        session: Option<String>,

        /// Objective this plan belongs to
        #[arg(long, value_parser = parse_plan_id)]
        objective: Option<PlanId>,

        /// Working branch (required by draft_pr; derived from the title if omitted)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Show a plan
    Show {
        #[arg(value_parser = parse_plan_id)]
        id: PlanId,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List plans
    List {
        /// Only plans in this stage
        #[arg(long)]
        stage: Option<LifecycleStage>,

        /// Include closed plans
        #[arg(long)]
        all: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a plan to a later lifecycle stage
    Stage {
        #[arg(value_parser = parse_plan_id)]
        id: PlanId,

        stage: LifecycleStage,
    },

    /// Comment on a plan
    Comment {
        #[arg(value_parser = parse_plan_id)]
        id: PlanId,

        text: String,
    },

    /// Close a plan
    Close {
        #[arg(value_parser = parse_plan_id)]
        id: PlanId,
    },

    /// Find the plan a branch implements
    Resolve { branch: String },

    /// Switch to a plan's working branch and bring it up to date with the remote
    Checkout {
        #[arg(value_parser = parse_plan_id)]
        id: PlanId,
    },

    /// Merge plans into one (or replace a single plan)
    Consolidate {
        #[arg(long)]
        title: String,

        /// File holding the merged plan text
        #[arg(long)]
        file: PathBuf,

        /// Session id; rerun with the same session to resume
        #[arg(long)]
        session: Option<String>,

        /// Plans to merge
        #[arg(required = true, value_parser = parse_plan_id)]
        ids: Vec<PlanId>,
    },
}

fn parse_plan_id(s: &str) -> std::result::Result<PlanId, String> {
    PlanId::parse(s).ok_or_else(|| format!("'{s}' is not a plan number, URL or ticket key"))
}

/// Local stores, loaded on start and saved after every command.
///
/// The store lock is held from load to the end of the command, so two
/// processes never interleave a load and a save.
struct Workspace {
    project: PathBuf,
    config: StoreConfig,
    containers: Arc<MemoryContainerStore>,
    tickets: Arc<MemoryTicketTracker>,
    _lock: FileLock,
}

impl Workspace {
    fn open(project: &Path, provider: Option<Provider>) -> Result<Self> {
        let lock = FileLock::acquire(&StoreConfig::lock_path(project))?;
        let mut config = StoreConfig::load(project)?;
        if let Some(provider) = provider {
            config.provider = provider;
        }
        let containers = MemoryContainerStore::load(&StoreConfig::containers_path(project))?;
        let tickets = MemoryTicketTracker::load(&StoreConfig::tickets_path(project))?
            .with_prefix(&config.ticket_prefix);
        Ok(Self {
            project: project.to_path_buf(),
            config,
            containers: Arc::new(containers),
            tickets: Arc::new(tickets),
            _lock: lock,
        })
    }

    fn backend(&self) -> Box<dyn PlanBackend> {
        let clients = StoreClients {
            containers: self.containers.clone(),
            tickets: self.tickets.clone(),
        };
        load_backend(self.config.provider, &self.config, &clients)
    }

    fn markers(&self) -> FileMarkerStore {
        FileMarkerStore::new(StoreConfig::sessions_dir(&self.project))
    }

    fn save(&self) -> Result<()> {
        self.containers
            .save(&StoreConfig::containers_path(&self.project))?;
        self.tickets.save(&StoreConfig::tickets_path(&self.project))?;
        Ok(())
    }

    fn new_plan(&self, title: &str, content: String, branch: Option<String>) -> NewPlan {
        let mut metadata = MetadataPatch::new();
        let branch = match (branch, self.config.provider) {
            (Some(branch), _) => Some(branch),
            (None, Provider::DraftPr) => Some(format!("plan/{}", slugify(title, 30))),
            (None, _) => None,
        };
        if let Some(branch) = branch {
            metadata = metadata.set(fields::BRANCH_NAME, branch);
        }
        NewPlan {
            title: title.to_string(),
            content,
            metadata,
            labels: Vec::new(),
            created_by: self.config.resolve_user(),
        }
    }
}

/// Branch a plan is implemented on.
fn working_branch(plan: &Plan) -> Result<String> {
    if let Some(branch) = plan.header_fields.branch_name() {
        return Ok(branch.to_string());
    }
    match (plan.provider, &plan.id) {
        (Provider::Issues, PlanId::Number(number)) => Ok(issue_branch_name(*number, &plan.title)),
        _ => Err(PlanError::validation(
            fields::BRANCH_NAME,
            format!("plan {} has no working branch", plan.id),
        )),
    }
}

fn read_plan_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| PlanError::File {
        path: path.to_path_buf(),
        source,
    })
}

fn print_plan(plan: &Plan) {
    println!("\n{} {}", plan.id.to_string().cyan().bold(), plan.title.bold());
    println!("{}", "─".repeat(40));
    println!("   Provider: {}", plan.provider);
    println!("   State: {}", plan.state);
    println!("   Stage: {}", plan.lifecycle_stage);
    if let Some(objective) = &plan.objective_id {
        println!("   Objective: {}", objective);
    }
    if let Some(url) = &plan.url {
        println!("   URL: {}", url);
    }
    if !plan.labels.is_empty() {
        let labels: Vec<&str> = plan.labels.iter().map(String::as_str).collect();
        println!("   Labels: {}", labels.join(", "));
    }
    if !plan.content.is_empty() {
        println!("\n{}", plan.content);
    }
}

fn run(cli: Cli) -> Result<()> {
    let project = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project.exists() {
        return Err(PlanError::config(
            "project",
            format!("directory does not exist: {}", project.display()),
        ));
    }

    if let Commands::Init { force } = cli.command {
        let path = StoreConfig::config_path(&project);
        if path.exists() && !force {
            println!(
                "{} {} already exists (use --force to overwrite)",
                "Skipped:".yellow().bold(),
                path.display()
            );
            return Ok(());
        }
        let mut config = StoreConfig::default();
        if let Some(provider) = cli.provider {
            config.provider = provider;
        }
        config.save(&project)?;
        println!("{} Wrote {}", "OK".green().bold(), path.display());
        return Ok(());
    }

    let workspace = Workspace::open(&project, cli.provider)?;
    let backend = workspace.backend();

    match cli.command {
        Commands::Init { .. } => {}

        Commands::Create {
            title,
            file,
            session,
            objective,
            branch,
        } => {
            let content = read_plan_file(&file)?;
            let session_id = session.unwrap_or_else(new_session_id);
            let mut new = workspace.new_plan(&title, String::new(), branch);
            if let Some(objective) = objective {
                new.metadata = new.metadata.set(fields::OBJECTIVE_ID, objective.to_value());
            }

            let staging = FileContentStaging::new(StoreConfig::scratch_dir(&project));
            staging.stage_content(&session_id, &content)?;
            let outcome = save_staged_plan(
                backend.as_ref(),
                &workspace.markers(),
                &staging,
                &session_id,
                new,
            )?;
            workspace.save()?;

            if outcome.created {
                println!("{} Created plan {}", "OK".green().bold(), outcome.plan.id);
            } else {
                println!(
                    "{} Plan {} already exists for this session",
                    "Skipped:".yellow().bold(),
                    outcome.plan.id
                );
            }
            println!("   Session: {}", session_id);
            if let Some(url) = &outcome.plan.url {
                println!("   URL: {}", url);
            }
        }

        Commands::Show { id, json } => {
            let plan = backend
                .get_plan(&id)?
                .ok_or(PlanError::NotFound { id })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }

        Commands::List { stage, all, json } => {
            let mut query = if all { PlanQuery::default() } else { PlanQuery::open() };
            if let Some(stage) = stage {
                query = query.with_stage(stage);
            }
            let plans = backend.list_plans(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else if plans.is_empty() {
                println!("No plans found");
            } else {
                for plan in &plans {
                    println!(
                        "{:>12}  {:<13} {:<7} {}",
                        plan.id.to_string().cyan(),
                        plan.lifecycle_stage.to_string(),
                        plan.state.to_string(),
                        plan.title
                    );
                }
            }
        }

        Commands::Stage { id, stage } => {
            let plan = backend
                .get_plan(&id)?
                .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
            if plan.is_closed() {
                return Err(PlanError::lifecycle(id, "plan is closed"));
            }
            if !plan.lifecycle_stage.can_transition_to(stage) {
                return Err(PlanError::lifecycle(
                    id,
                    format!("cannot move from {} back to {}", plan.lifecycle_stage, stage),
                ));
            }
            let patch = MetadataPatch::new()
                .stage(stage)
                .with_comment_ref(fields::LAST_EVENT_COMMENT_ID);
            let comment = format!("Moved to **{stage}**");
            backend.post_event(&id, Some(&comment), Some(patch))?;
            workspace.save()?;
            println!("{} Plan {} is now {}", "OK".green().bold(), id, stage);
        }

        Commands::Comment { id, text } => {
            let comment_id = backend.add_comment(&id, &text)?;
            workspace.save()?;
            println!("{} Comment {} added to {}", "OK".green().bold(), comment_id, id);
        }

        Commands::Close { id } => {
            backend.close_plan(&id)?;
            workspace.save()?;
            println!("{} Plan {} closed", "OK".green().bold(), id);
        }

        Commands::Resolve { branch } => {
            let id = backend
                .resolve_branch(&branch)?
                .ok_or(PlanError::UnknownBranch { branch })?;
            println!("{}", id);
            if let Some(reference) = backend.closing_reference(&id) {
                println!("   Closing reference: {}", reference);
            }
        }

        Commands::Checkout { id } => {
            let plan = backend
                .get_plan(&id)?
                .ok_or_else(|| PlanError::NotFound { id: id.clone() })?;
            let branch = working_branch(&plan)?;
            let git = GitCli::new(project.clone());
            let outcome = sync_branch(&git, &workspace.config.remote, &branch)?;

            if outcome.created_tracking_branch {
                println!(
                    "{} Created '{}' tracking {}/{}",
                    "OK".green().bold(),
                    branch,
                    workspace.config.remote,
                    branch
                );
            } else if outcome.switched {
                println!("{} Switched to '{}'", "OK".green().bold(), branch);
            } else {
                println!("{} Already on '{}'", "OK".green().bold(), branch);
            }
            if outcome.rebased {
                println!("   Rebased onto {}/{}", workspace.config.remote, branch);
            }
        }

        Commands::Consolidate {
            title,
            file,
            session,
            ids,
        } => {
            let content = read_plan_file(&file)?;
            let session_id = session.unwrap_or_else(new_session_id);
            let output = workspace.new_plan(&title, content, None);
            let markers = workspace.markers();

            let outcome = if ids.len() == 1 {
                consolidation::replan(backend.as_ref(), &markers, &ids[0], output, &session_id)?
            } else {
                consolidation::consolidate(
                    backend.as_ref(),
                    &markers,
                    &workspace.config.labels.consolidated,
                    &ids,
                    output,
                    &session_id,
                )?
            };
            workspace.save()?;

            println!(
                "{} {:?} produced plan {}",
                "OK".green().bold(),
                outcome.kind,
                outcome.plan.id
            );
            for id in &outcome.closed {
                println!("   Closed {}", id);
            }
            for id in &outcome.already_closed {
                println!("   Already closed {}", id);
            }
            println!("   Session: {}", session_id);
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "planstore=debug,info"
    } else {
        "planstore=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
