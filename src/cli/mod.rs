#![forbid(unsafe_code)]

use std::io::IsTerminal as _;
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory as _, Parser, Subcommand, ValueEnum};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::config::{self, Config};
use crate::error::OnyxError;
use crate::flow::{self, SaveReport, TaskForm};
use crate::output::table::Table;
use crate::reminder::outbox::{OutboxNotifier, PendingNotification};
use crate::reminder::{Notice, ReminderOutcome, ReminderScheduler};
use crate::task::model::{Filter, Repeat, StatusFilter, Task, TaskUpdate, time_label};
use crate::task::storage::{FileStore, KeyValueStore};
use crate::task::store::TaskStore;

#[derive(Debug, Parser)]
#[command(name = "onyx", version, about = "Personal tasks with reminders")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a task
    Add(AddArgs),
    /// Edit an existing task
    Edit(EditArgs),
    /// List tasks (uses the saved filter unless --status is given)
    #[command(alias = "ls")]
    List(ListArgs),
    /// Show one task
    Show(TaskRefArgs),
    /// Toggle a task between completed and incomplete
    #[command(alias = "toggle")]
    Done(TaskRefArgs),
    /// Delete a task
    #[command(alias = "remove")]
    Rm(TaskRefArgs),
    /// Delete all tasks
    Clear(ClearArgs),
    /// Show or set the saved status filter
    Filter(FilterArgs),
    /// Show or toggle notifications
    Notifications(NotificationsArgs),
    /// Inspect and deliver scheduled reminders
    Reminders(RemindersArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// What needs to be done
    pub title: String,
    /// Optional note
    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
    /// Due/reminder time: HH:MM (today), "YYYY-MM-DD HH:MM" or RFC 3339
    #[arg(long = "at")]
    pub at: Option<String>,
    /// daily, weekly, monthly or none
    #[arg(short = 'r', long = "repeat")]
    pub repeat: Option<Repeat>,
    /// Schedule a reminder at the due time
    #[arg(long = "remind")]
    pub remind: bool,
}

#[derive(Debug, Parser)]
pub struct EditArgs {
    /// Task id or part of its title
    pub task: String,
    #[arg(short = 't', long = "title")]
    pub title: Option<String>,
    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
    #[arg(long = "at")]
    pub at: Option<String>,
    #[arg(short = 'r', long = "repeat")]
    pub repeat: Option<Repeat>,
    #[arg(long = "remind", overrides_with = "no_remind")]
    pub remind: bool,
    #[arg(long = "no-remind", overrides_with = "remind")]
    pub no_remind: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// all, completed or incomplete
    #[arg(short = 's', long = "status")]
    pub status: Option<StatusFilter>,
    /// Show descriptions
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    #[arg(long = "json")]
    pub json: bool,
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct TaskRefArgs {
    /// Task id or part of its title
    pub task: String,
}

#[derive(Debug, Parser)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

#[derive(Debug, Parser)]
pub struct FilterArgs {
    pub status: Option<StatusFilter>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Parser)]
pub struct NotificationsArgs {
    pub state: Option<Toggle>,
}

#[derive(Debug, Parser)]
pub struct RemindersArgs {
    #[command(subcommand)]
    pub cmd: RemindersCmd,
}

#[derive(Debug, Subcommand)]
pub enum RemindersCmd {
    /// List reminders waiting to fire
    List {
        #[arg(long = "json")]
        json: bool,
    },
    /// Deliver reminders that are due
    Fire,
    /// Keep delivering reminders until interrupted
    Watch,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub async fn main() -> ExitCode {
    // Must run before anything spawns a thread, or the local offset is unavailable.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let cli = Cli::parse();

    match run(cli, offset).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, offset: UtcOffset) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "onyx", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Version) => Ok(cmd_version()),
        Some(Commands::Config(args)) => cmd_config(args),
        Some(cmd) => {
            let mut app = App::open(config::load()?, offset)?;
            app.dispatch(cmd).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let app = App::open(config::load()?, offset)?;
            app.list(&ListArgs {
                status: None,
                verbose: false,
                json: false,
                csv: false,
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<ExitCode> {
    match args.cmd {
        ConfigCmd::List => print!("{}", config::list_resolved_toml()?),
        ConfigCmd::Set(set) => {
            config::set_value_string(&set.key, &set.value)?;
            println!("Set {} = {}", set.key, set.value);
        }
        ConfigCmd::Get(get) => match config::get_value_string(&get.key)? {
            Some(v) => println!("{v}"),
            None => anyhow::bail!(
                "configuration key '{}' not found - use 'onyx config list' to see available keys",
                get.key
            ),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("onyx version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

type Scheduler = ReminderScheduler<OutboxNotifier<FileStore>>;

struct App {
    cfg: Config,
    store: TaskStore<FileStore>,
    scheduler: Scheduler,
    offset: UtcOffset,
}

impl App {
    fn open(cfg: Config, offset: UtcOffset) -> anyhow::Result<Self> {
        let files = FileStore::new(cfg.data_dir()?);
        let store = TaskStore::load_with_key(files.clone(), cfg.storage.key.clone());
        let scheduler =
            ReminderScheduler::new(OutboxNotifier::new(files, cfg.notifications.permission));
        Ok(Self {
            cfg,
            store,
            scheduler,
            offset,
        })
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    async fn dispatch(&mut self, cmd: Commands) -> anyhow::Result<()> {
        match cmd {
            Commands::Add(args) => self.add(args).await,
            Commands::Edit(args) => self.edit(args).await,
            Commands::List(args) => self.list(&args),
            Commands::Show(args) => {
                let task = resolve_task(&self.store, &args.task)?;
                self.print_task_details(&task);
                Ok(())
            }
            Commands::Done(args) => self.toggle(&args.task),
            Commands::Rm(args) => self.remove(&args.task).await,
            Commands::Clear(args) => self.clear(&args).await,
            Commands::Filter(args) => {
                self.filter(args.status);
                Ok(())
            }
            Commands::Notifications(args) => {
                self.notifications(args.state).await;
                Ok(())
            }
            Commands::Reminders(args) => self.reminders(args.cmd).await,
            Commands::Config(_) | Commands::Completion(_) | Commands::Version => Ok(()),
        }
    }

    async fn add(&mut self, args: AddArgs) -> anyhow::Result<()> {
        let now = self.now();
        let date = match args.at.as_deref() {
            Some(at) => parse_when(at, now)?,
            None => now,
        };
        let form = TaskForm {
            title: args.title,
            description: args.description.unwrap_or_default(),
            repeat: args.repeat.unwrap_or_default(),
            reminder: args.remind,
            ..TaskForm::new(date)
        };
        let report = flow::save_task(
            &mut self.store,
            &mut self.scheduler,
            None,
            form,
            self.cfg.ui.clock_24h,
            now,
        )
        .await?;
        println!("Created task {}: {}", report.task.id, report.task.title);
        self.print_reminder_outcome(&report);
        Ok(())
    }

    async fn edit(&mut self, args: EditArgs) -> anyhow::Result<()> {
        let now = self.now();
        let task = resolve_task(&self.store, &args.task)?;
        let mut form = TaskForm::from_task(&task);
        if let Some(title) = args.title {
            form.title = title;
        }
        if let Some(description) = args.description {
            form.description = description;
        }
        if let Some(at) = args.at.as_deref() {
            form.date = parse_when(at, now)?;
        }
        if let Some(repeat) = args.repeat {
            form.repeat = repeat;
        }
        if args.remind {
            form.reminder = true;
        }
        if args.no_remind {
            form.reminder = false;
        }

        let report = flow::save_task(
            &mut self.store,
            &mut self.scheduler,
            Some(&task.id),
            form,
            self.cfg.ui.clock_24h,
            now,
        )
        .await?;
        println!("Updated task {}: {}", report.task.id, report.task.title);
        self.print_reminder_outcome(&report);
        Ok(())
    }

    /// `--status` overrides the saved filter for this listing only.
    fn listed_tasks(&self, status: Option<StatusFilter>) -> (Filter, Vec<&Task>) {
        match status {
            Some(status) => {
                let filter = Filter { status };
                let tasks = self.store.tasks().iter().filter(|t| filter.matches(t)).collect();
                (filter, tasks)
            }
            None => (self.store.filter(), self.store.visible_tasks().collect()),
        }
    }

    fn list(&self, args: &ListArgs) -> anyhow::Result<()> {
        let (filter, tasks) = self.listed_tasks(args.status);

        if args.json {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
            return Ok(());
        }

        if args.csv {
            let mut t = Table::new(["id", "title", "completed", "date", "repeat", "reminder"]);
            for task in &tasks {
                t.row([
                    task.id.clone(),
                    task.title.clone(),
                    task.is_completed.to_string(),
                    task.date.format(&Rfc3339).unwrap_or_default(),
                    task.repeat.label().to_owned(),
                    task.reminder.to_string(),
                ]);
            }
            t.print_csv()?;
            return Ok(());
        }

        if tasks.is_empty() {
            if filter.status == StatusFilter::All {
                println!("No tasks yet. Add one with `onyx add`.");
            } else {
                println!("No {} tasks.", filter.status.label().to_lowercase());
            }
            return Ok(());
        }

        let mut headers = vec!["ID", "STATUS", "TITLE", "DUE", "REPEAT", "REMINDER"];
        if args.verbose {
            headers.push("NOTE");
        }
        let mut t = Table::new(headers);
        for task in &tasks {
            let mut row = vec![
                task.id.clone(),
                self.status_cell(task),
                truncate(&task.title, 40),
                self.due_cell(task),
                task.repeat.label().to_owned(),
                (if task.reminder { "on" } else { "-" }).to_owned(),
            ];
            if args.verbose {
                row.push(truncate(task.description.as_deref().unwrap_or("-"), 60));
            }
            t.row(row);
        }
        t.print()?;
        if filter.status != StatusFilter::All {
            println!("\nFilter: {}", filter.status.label());
        }
        Ok(())
    }

    fn toggle(&mut self, pattern: &str) -> anyhow::Result<()> {
        let task = resolve_task(&self.store, pattern)?;
        match self.store.toggle_completion(&task.id) {
            Some(true) => println!("Completed: {}", task.title),
            Some(false) => println!("Marked incomplete: {}", task.title),
            None => return Err(OnyxError::TaskNotFound(pattern.to_owned()).into()),
        }
        Ok(())
    }

    async fn remove(&mut self, pattern: &str) -> anyhow::Result<()> {
        let task = resolve_task(&self.store, pattern)?;
        let removed = flow::delete_task(&mut self.store, &self.scheduler, &task.id)
            .await
            .ok_or_else(|| OnyxError::TaskNotFound(pattern.to_owned()))?;
        println!("Deleted task {}: {}", removed.id, removed.title);
        Ok(())
    }

    async fn clear(&mut self, args: &ClearArgs) -> anyhow::Result<()> {
        if !args.yes {
            if !std::io::stdin().is_terminal() {
                anyhow::bail!("refusing to clear all tasks without --yes when stdin is not a terminal");
            }
            if !confirm_clear(self.store.tasks().len())? {
                return Err(OnyxError::Cancelled.into());
            }
        }
        let notice = flow::clear_all(&mut self.store, &self.scheduler).await;
        println!("{}", notice.message());
        Ok(())
    }

    fn filter(&mut self, status: Option<StatusFilter>) {
        match status {
            Some(status) => {
                self.store.set_filter(Filter { status });
                println!("Filter set to {}", status.label());
            }
            None => println!("{}", self.store.filter().status.label()),
        }
    }

    async fn notifications(&mut self, state: Option<Toggle>) {
        if let Some(state) = state {
            let enable = matches!(state, Toggle::On);
            if let Some(notice) =
                flow::set_notifications(&mut self.store, &mut self.scheduler, enable).await
            {
                print_notice(notice);
            }
        }
        let label = if self.store.notifications_enabled() {
            "on"
        } else {
            "off"
        };
        println!("Notifications: {label}");
    }

    async fn reminders(&mut self, cmd: RemindersCmd) -> anyhow::Result<()> {
        match cmd {
            RemindersCmd::List { json } => {
                let pending = self.scheduler.service().pending()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&pending)?);
                    return Ok(());
                }
                if pending.is_empty() {
                    println!("No pending reminders.");
                    return Ok(());
                }
                let mut t = Table::new(["HANDLE", "FIRES AT", "TITLE"]);
                for p in &pending {
                    t.row([
                        p.handle.to_string(),
                        self.format_local(p.request.fire_at),
                        truncate(&p.request.title, 40),
                    ]);
                }
                t.print()?;
                Ok(())
            }
            RemindersCmd::Fire => {
                let due = self.scheduler.service().take_due(self.now())?;
                if due.is_empty() {
                    println!("No reminders due.");
                }
                for p in &due {
                    self.deliver(p);
                }
                Ok(())
            }
            RemindersCmd::Watch => self.watch_reminders().await,
        }
    }

    async fn watch_reminders(&mut self) -> anyhow::Result<()> {
        let every = Duration::from_secs(self.cfg.notifications.poll_interval_secs);
        let mut ticker = tokio::time::interval(every);
        println!("Watching for reminders every {}s [Press Ctrl+C to exit]", every.as_secs());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let due = self.scheduler.service().take_due(self.now());
                    match due {
                        Ok(due) => {
                            for p in &due {
                                self.deliver(p);
                            }
                        }
                        Err(e) => tracing::warn!(error = %format!("{e:#}"), "failed to read reminder outbox"),
                    }
                }
            }
        }
    }

    /// Prints a due reminder and clears the handle on the task that owned it.
    fn deliver(&mut self, p: &PendingNotification) {
        if p.request.body.trim().is_empty() {
            println!("[reminder {}] {}", self.format_local(p.request.fire_at), p.request.title);
        } else {
            println!(
                "[reminder {}] {}: {}",
                self.format_local(p.request.fire_at),
                p.request.title,
                p.request.body
            );
        }

        // Other runs may have written tasks while this one was waiting.
        self.store.reload();
        let owner = self
            .store
            .tasks()
            .iter()
            .find(|t| t.notification_id.as_deref() == Some(p.handle.as_str()))
            .map(|t| t.id.clone());
        if let Some(id) = owner {
            self.store.update(
                &id,
                &TaskUpdate {
                    notification_id: Some(None),
                    ..TaskUpdate::default()
                },
            );
        }
    }

    fn print_reminder_outcome(&self, report: &SaveReport) {
        match &report.reminder {
            ReminderOutcome::Scheduled(_) => {
                println!("Reminder set for {}", self.format_local(report.task.date));
            }
            ReminderOutcome::PastDue => {
                eprintln!("Note: reminder time is in the past, no notification will be shown.");
            }
            ReminderOutcome::Failed(msg) => eprintln!("warning: reminder not scheduled: {msg}"),
            ReminderOutcome::NotificationsDisabled
            | ReminderOutcome::PermissionDenied
            | ReminderOutcome::NotRequested => {
                if let Some(notice) = report.notice() {
                    print_notice(notice);
                }
            }
        }
    }

    fn print_task_details(&self, task: &Task) {
        println!("Task: {} (ID: {})", task.title, task.id);
        println!(
            "Status: {}",
            if task.is_completed {
                "completed"
            } else {
                "incomplete"
            }
        );
        println!("Due: {}", self.due_cell(task));
        println!("Repeat: {}", task.repeat.label());
        println!("Reminder: {}", if task.reminder { "on" } else { "off" });
        if let Some(handle) = task.notification_id.as_deref() {
            println!("Scheduled notification: {handle}");
        }
        if let Some(desc) = task.description.as_deref()
            && !desc.trim().is_empty()
        {
            println!("\n{desc}");
        }
    }

    fn status_cell(&self, task: &Task) -> String {
        match (self.cfg.ui.icons, task.is_completed) {
            (true, true) => "✓ done".to_owned(),
            (true, false) => "○ open".to_owned(),
            (false, true) => "done".to_owned(),
            (false, false) => "open".to_owned(),
        }
    }

    fn due_cell(&self, task: &Task) -> String {
        let local = task.date.to_offset(self.offset);
        let day = local
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_default();
        let time = task
            .time
            .clone()
            .unwrap_or_else(|| time_label(local, self.cfg.ui.clock_24h));
        format!("{day} {time}")
    }

    fn format_local(&self, at: OffsetDateTime) -> String {
        let local = at.to_offset(self.offset);
        let day = local
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_default();
        format!("{day} {}", time_label(local, self.cfg.ui.clock_24h))
    }
}

fn print_notice(notice: Notice) {
    eprintln!("{}: {}", notice.title(), notice.message());
}

fn confirm_clear(count: usize) -> anyhow::Result<bool> {
    println!("This will permanently delete all your tasks ({count}).");
    print!("Are you sure? This action cannot be undone. (y/N): ");
    std::io::Write::flush(&mut std::io::stdout())?;
    let mut input = String::new();
    let _ = std::io::stdin().read_line(&mut input)?;
    let resp = input.trim().to_lowercase();
    Ok(resp == "y" || resp == "yes")
}

/// Exact id first, then a unique case-insensitive match on id or title.
fn resolve_task<S: KeyValueStore>(
    store: &TaskStore<S>,
    pattern: &str,
) -> Result<Task, OnyxError> {
    if let Some(task) = store.get(pattern) {
        return Ok(task.clone());
    }

    let p = pattern.trim().to_lowercase();
    if p.is_empty() {
        return Err(OnyxError::TaskNotFound(pattern.to_owned()));
    }
    let mut matches: Vec<&Task> = store
        .tasks()
        .iter()
        .filter(|t| t.id.contains(&p) || t.title.to_lowercase().contains(&p))
        .collect();

    match matches.len() {
        0 => Err(OnyxError::TaskNotFound(pattern.to_owned())),
        1 => Ok(matches.remove(0).clone()),
        n => Err(OnyxError::AmbiguousTask {
            pattern: pattern.to_owned(),
            matches: n,
        }),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM` (local) or `HH:MM` (today, local).
fn parse_when(input: &str, now: OffsetDateTime) -> Result<OffsetDateTime, OnyxError> {
    let s = input.trim();
    if let Ok(at) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(at.to_offset(now.offset()));
    }
    if let Ok(at) = PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]")) {
        return Ok(at.assume_offset(now.offset()));
    }
    match time::Time::parse(s, format_description!("[hour]:[minute]")) {
        Ok(t) => Ok(now.replace_time(t)),
        Err(e) => Err(OnyxError::InvalidDateTime {
            input: input.to_owned(),
            msg: format!("expected HH:MM, \"YYYY-MM-DD HH:MM\" or RFC 3339 ({e})"),
        }),
    }
}

fn truncate(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}
