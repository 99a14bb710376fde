mod server;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cadence_core::{
    ActionNode, BucketKey, DateResolver, Forest, Habit, LifecycleEvent, LifecycleProcessor,
    ProcessReport, TargetLifecycleMigrator, Viewer, daily_view, needs_grace_review,
    parse_simulated_instant, time_zone,
};
use cadence_store::{CadenceConfig, Store, resolve_base_dir};
use clap::{Args, Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};

#[derive(Parser)]
#[command(name = "cadence", about = "Habit lifecycle engine CLI and MCP server")]
struct Cli {
    /// Act as this user instead of the configured default
    #[arg(long, global = true)]
    user: Option<String>,

    /// IANA time zone for this invocation, overriding stored settings
    #[arg(long, global = true)]
    tz: Option<String>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Manage habits
    Habit {
        #[command(subcommand)]
        command: HabitCommand,
    },

    /// Mark a habit done for today
    Complete {
        /// Habit id, id prefix, or name
        habit: String,
    },

    /// Revert today's completion
    Undo {
        /// Habit id, id prefix, or name
        habit: String,
    },

    /// Bring all habits up to date and list grace prompts
    Process,

    /// List habits still awaiting an answer about yesterday
    Grace,

    /// Answer the grace prompt for a habit
    Resolve {
        /// Habit id, id prefix, or name
        habit: String,

        /// Yesterday was done after all
        #[arg(long, conflicts_with = "missed", required_unless_present = "missed")]
        done: bool,

        /// Yesterday was missed
        #[arg(long)]
        missed: bool,
    },

    /// Monthly target buckets
    Targets {
        #[command(subcommand)]
        command: TargetsCommand,
    },

    /// Today's action tree
    Actions {
        #[command(subcommand)]
        command: ActionsCommand,
    },

    /// Pin or release the clock used to compute "today"
    TimeTravel {
        #[command(subcommand)]
        command: TimeTravelCommand,
    },
}

#[derive(Subcommand)]
enum HabitCommand {
    /// Create a habit
    Add {
        name: String,
        #[arg(long)]
        goal_value: Option<f64>,
        #[arg(long)]
        goal_unit: Option<String>,
        /// Visible to visitors
        #[arg(long)]
        public: bool,
    },
    /// List habits with state and streak
    List,
}

#[derive(Args)]
struct BucketArg {
    /// Month as YYYY-MM (defaults to the current month)
    #[arg(long, conflicts_with = "future")]
    month: Option<String>,
    /// The undated future bucket
    #[arg(long)]
    future: bool,
}

#[derive(Subcommand)]
enum TargetsCommand {
    /// Carry last month's unfinished targets into this month
    Migrate,
    /// Print a bucket
    Show {
        #[command(flatten)]
        bucket: BucketArg,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace a bucket with a JSON forest read from a file
    Import {
        file: PathBuf,
        #[command(flatten)]
        bucket: BucketArg,
    },
}

#[derive(Subcommand)]
enum ActionsCommand {
    /// Replace the action tree with a JSON forest read from a file
    Import { file: PathBuf },
    /// Print today's view of the action tree
    Show {
        /// Show what a visitor sees
        #[arg(long)]
        public: bool,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TimeTravelCommand {
    /// Freeze "now" at an RFC 3339 instant or the start of a YYYY-MM-DD day
    Set { at: String },
    /// Return to the real clock
    Clear,
    /// Print the effective clock, zone, and today
    Show,
}

/// Everything a command needs: the opened store and who it acts for.
struct Session {
    store: Store,
    config: CadenceConfig,
    user: String,
    tz: Option<String>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let base = resolve_base_dir(None);
        let config = CadenceConfig::load(&base).context("failed to load config")?;
        let store = Store::open_in_dir(&base).context("failed to open store")?;
        let user = cli
            .user
            .clone()
            .unwrap_or_else(|| config.default_user.clone());
        if let Some(tz) = &cli.tz {
            time_zone(tz)?;
        }
        Ok(Self {
            store,
            config,
            user,
            tz: cli.tz.clone(),
        })
    }

    fn resolver(&self) -> Result<DateResolver> {
        self.store
            .resolver(&self.user, &self.config, self.tz.as_deref())
            .context("failed to resolve today")
    }

    /// Catch up all habits before acting on one, so its state reflects today.
    fn refresh(&self, resolver: &DateResolver) -> Result<ProcessReport> {
        LifecycleProcessor::run(&self.store, &self.user, resolver.today())
            .context("lifecycle processing failed")
    }

    fn find(&self, needle: &str) -> Result<Habit> {
        self.store
            .find_habit(&self.user, needle)
            .with_context(|| format!("no habit matching '{needle}'"))
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let session = Session::open(&cli)?;
    match &cli.command {
        Commands::Serve => cmd_serve(session).await,
        Commands::Habit { command } => match command {
            HabitCommand::Add {
                name,
                goal_value,
                goal_unit,
                public,
            } => cmd_habit_add(&session, name, *goal_value, goal_unit.clone(), *public),
            HabitCommand::List => cmd_habit_list(&session),
        },
        Commands::Complete { habit } => cmd_user_event(&session, habit, LifecycleEvent::UserComplete),
        Commands::Undo { habit } => cmd_user_event(&session, habit, LifecycleEvent::UserUndo),
        Commands::Process => cmd_process(&session),
        Commands::Grace => cmd_grace(&session),
        Commands::Resolve { habit, done, .. } => cmd_resolve(&session, habit, *done),
        Commands::Targets { command } => match command {
            TargetsCommand::Migrate => cmd_targets_migrate(&session),
            TargetsCommand::Show { bucket, json } => cmd_targets_show(&session, bucket, *json),
            TargetsCommand::Import { file, bucket } => cmd_targets_import(&session, file, bucket),
        },
        Commands::Actions { command } => match command {
            ActionsCommand::Import { file } => cmd_actions_import(&session, file),
            ActionsCommand::Show { public, json } => cmd_actions_show(&session, *public, *json),
        },
        Commands::TimeTravel { command } => match command {
            TimeTravelCommand::Set { at } => cmd_time_travel_set(&session, at),
            TimeTravelCommand::Clear => cmd_time_travel_clear(&session),
            TimeTravelCommand::Show => cmd_time_travel_show(&session),
        },
    }
}

async fn cmd_serve(session: Session) -> Result<()> {
    tracing::info!("starting MCP server for user '{}'", session.user);

    let server = server::CadenceServer::new(session.store, session.config, session.user, session.tz);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;
    Ok(())
}

fn cmd_habit_add(
    session: &Session,
    name: &str,
    goal_value: Option<f64>,
    goal_unit: Option<String>,
    public: bool,
) -> Result<()> {
    let today = session.resolver()?.today();
    let mut habit = Habit::new(&session.user, name, today);
    habit.goal_value = goal_value;
    habit.goal_unit = goal_unit;
    habit.is_public = public;
    session
        .store
        .create_habit(&habit)
        .context("failed to create habit")?;

    println!("created {} {}", short_id(&habit), habit.name);
    Ok(())
}

fn cmd_habit_list(session: &Session) -> Result<()> {
    let records = session.store.list_habits(&session.user)?;
    if records.is_empty() {
        println!("(no habits)");
        return Ok(());
    }
    for record in &records {
        match record {
            Ok(habit) => print_habit(habit),
            Err(bad) => println!("unreadable: {} ({}): {}", bad.name, bad.habit_id, bad.error),
        }
    }
    Ok(())
}

fn cmd_user_event(session: &Session, needle: &str, event: LifecycleEvent) -> Result<()> {
    let resolver = session.resolver()?;
    session.refresh(&resolver)?;
    let today = resolver.today();
    let habit = session.find(needle)?;

    if event == LifecycleEvent::UserComplete && needs_grace_review(&habit, today)? {
        bail!(
            "'{}' still has a pending grace decision for yesterday: answer the grace prompt first",
            habit.name
        );
    }
    let updated = LifecycleProcessor::apply(&session.store, &habit, event, today)
        .with_context(|| format!("cannot apply {event} to '{}'", habit.name))?;
    print_habit(&updated);
    Ok(())
}

fn cmd_process(session: &Session) -> Result<()> {
    let resolver = session.resolver()?;
    let report = session.refresh(&resolver)?;

    println!(
        "{}: processed {} habit(s)",
        resolver.today(),
        report.processed_count
    );
    for habit in &report.grace_habits {
        println!("grace: did you do '{}' yesterday?", habit.name);
    }
    for failure in &report.failures {
        println!("failed: {}: {}", failure.name, failure.error);
    }
    Ok(())
}

fn cmd_grace(session: &Session) -> Result<()> {
    let resolver = session.resolver()?;
    session.refresh(&resolver)?;
    let today = resolver.today();

    let mut pending = 0;
    for habit in session.store.list_habits(&session.user)?.into_iter().flatten() {
        if needs_grace_review(&habit, today)? {
            print_habit(&habit);
            pending += 1;
        }
    }
    if pending == 0 {
        println!("(nothing to review)");
    }
    Ok(())
}

fn cmd_resolve(session: &Session, needle: &str, done: bool) -> Result<()> {
    let resolver = session.resolver()?;
    session.refresh(&resolver)?;
    let today = resolver.today();
    let habit = session.find(needle)?;

    if !needs_grace_review(&habit, today)? {
        bail!("'{}' has no pending grace decision", habit.name);
    }
    let updated = if done {
        LifecycleProcessor::resolve_habit_complete(&session.store, &habit, today)?
    } else {
        LifecycleProcessor::resolve_habit_incomplete(&session.store, &habit, today)?
    };
    print_habit(&updated);
    Ok(())
}

fn cmd_targets_migrate(session: &Session) -> Result<()> {
    let today = session.resolver()?.today();
    let report = TargetLifecycleMigrator::run(&session.store, &session.user, today)
        .context("target migration failed")?;
    println!(
        "{} -> {}: migrated {}, skipped {}, retained {}",
        report.previous, report.current, report.migrated, report.skipped, report.retained
    );
    Ok(())
}

fn bucket_key(session: &Session, arg: &BucketArg) -> Result<BucketKey> {
    if arg.future {
        return Ok(BucketKey::Future);
    }
    match &arg.month {
        Some(month) => Ok(BucketKey::parse(month)?),
        None => Ok(BucketKey::month_of(session.resolver()?.today())),
    }
}

fn cmd_targets_show(session: &Session, arg: &BucketArg, json: bool) -> Result<()> {
    let key = bucket_key(session, arg)?;
    let forest = session.store.fetch_bucket(&session.user, key)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
        return Ok(());
    }
    println!("targets {key}");
    print_forest(&forest);
    Ok(())
}

fn cmd_targets_import(session: &Session, file: &Path, arg: &BucketArg) -> Result<()> {
    let key = bucket_key(session, arg)?;
    let forest = read_forest(file)?;
    session.store.update_bucket(&session.user, key, &forest)?;
    println!("imported {} top-level target(s) into {key}", forest.len());
    Ok(())
}

fn cmd_actions_import(session: &Session, file: &Path) -> Result<()> {
    let forest = read_forest(file)?;
    session.store.save_action_tree(&session.user, &forest)?;
    println!("imported {} top-level action(s)", forest.len());
    Ok(())
}

fn cmd_actions_show(session: &Session, public: bool, json: bool) -> Result<()> {
    let start = session.resolver()?.start_of_day()?;
    let forest = session.store.fetch_action_tree(&session.user)?;
    let viewer = if public { Viewer::Visitor } else { Viewer::Owner };
    let view = daily_view(&forest, start, viewer);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    print_forest(&view.forest);
    if view.hidden_count > 0 {
        println!("({} private item(s) hidden)", view.hidden_count);
    }
    Ok(())
}

fn cmd_time_travel_set(session: &Session, at: &str) -> Result<()> {
    let resolver = session.resolver()?;
    let instant = parse_simulated_instant(at, resolver.time_zone())?;
    session
        .store
        .set_simulated_now(&session.user, Some(instant))?;
    let pinned = session.resolver()?;
    println!("clock pinned to {instant}; today is {}", pinned.today());
    Ok(())
}

fn cmd_time_travel_clear(session: &Session) -> Result<()> {
    session.store.set_simulated_now(&session.user, None)?;
    println!("clock released; today is {}", session.resolver()?.today());
    Ok(())
}

fn cmd_time_travel_show(session: &Session) -> Result<()> {
    let resolver = session.resolver()?;
    match resolver.simulated() {
        Some(at) => println!("simulated: {at}"),
        None => println!("real clock"),
    }
    println!("zone:  {}", resolver.tz_name());
    println!("today: {}", resolver.today());
    Ok(())
}

fn read_forest(path: &Path) -> Result<Forest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON action forest", path.display()))
}

fn short_id(habit: &Habit) -> String {
    habit.id.to_string()[..8].to_string()
}

fn print_habit(habit: &Habit) {
    println!(
        "{}  {:<9}  streak {:>3}  best {:>3}  {}",
        short_id(habit),
        habit.habit_state.as_str(),
        habit.streak,
        habit.longest_streak,
        habit.name
    );
}

fn print_forest(forest: &[ActionNode]) {
    if forest.is_empty() {
        println!("(empty)");
        return;
    }
    fn print_level(nodes: &[ActionNode], depth: usize) {
        for node in nodes {
            let mark = if node.completed { "x" } else { " " };
            println!("{}[{mark}] {} ({})", "  ".repeat(depth), node.description, node.id);
            print_level(&node.children, depth + 1);
        }
    }
    print_level(forest, 0);
}
