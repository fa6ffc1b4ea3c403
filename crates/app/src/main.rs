use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use exam_core::model::{Assessment, AttemptId, QuestionId};
use exam_core::{AttemptSession, SubmissionState};
use services::{
    ApiConfig, AttemptError, AttemptLoop, AttemptService, ChannelNotifier, Clock, Command,
    HttpAttemptApi, LogNotifier, LoopConfig, Notifier, SessionStatus, SubmitService, SyncService,
    command_channel,
};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingAssessment,
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidAttemptId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingAssessment => write!(f, "--assessment is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidAttemptId { raw } => write!(f, "invalid --attempt-id value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  cargo run -p app -- run --assessment <file.json> [--attempt-id <id>] [--db <sqlite_url>] [--file-ref <id>]"
    );
    eprintln!("  cargo run -p app -- announcements --attempt-id <id> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:exam.sqlite3");
    eprintln!("  --attempt-id <newly generated>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_ATTEMPT_ID, EXAM_API_BASE_URL, EXAM_API_TOKEN,");
    eprintln!("  EXAM_TAB_SWITCH_THRESHOLD, RUST_LOG");
    eprintln!();
    eprintln!("Commands read from stdin while running:");
    eprintln!("  next | prev | goto <question> | section <index>");
    eprintln!("  answer <question> <value>... | clear <question> | review <question>");
    eprintln!("  hidden | pick <index> | resume | submit [file-ref] | status");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Run,
    Announcements,
}

impl Subcommand {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "announcements" => Some(Self::Announcements),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    attempt_id: Option<AttemptId>,
    assessment: Option<PathBuf>,
    file_ref: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://exam.sqlite3".into(), normalize_sqlite_url);
        let mut attempt_id = std::env::var("EXAM_ATTEMPT_ID")
            .ok()
            .and_then(|value| value.parse::<AttemptId>().ok());
        let mut assessment = None;
        let mut file_ref = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--attempt-id" => {
                    let value = require_value(args, "--attempt-id")?;
                    let parsed = value
                        .parse::<AttemptId>()
                        .map_err(|_| ArgsError::InvalidAttemptId { raw: value.clone() })?;
                    attempt_id = Some(parsed);
                }
                "--assessment" => {
                    assessment = Some(PathBuf::from(require_value(args, "--assessment")?));
                }
                "--file-ref" => file_ref = Some(require_value(args, "--file-ref")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            attempt_id,
            assessment,
            file_ref,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

/// Parse one stdin line. Blank lines yield `None`.
fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let mut question = |verb: &str| {
        words
            .next()
            .map(QuestionId::new)
            .ok_or_else(|| format!("{verb} needs a question id"))
    };
    let command = match verb {
        "next" | "n" => Command::Next,
        "prev" | "p" => Command::Previous,
        "goto" => Command::GoTo(question(verb)?),
        "clear" => Command::Clear(question(verb)?),
        "review" => Command::ToggleReview(question(verb)?),
        "answer" => {
            let question = question(verb)?;
            Command::Answer {
                question,
                values: words.map(str::to_owned).collect(),
            }
        }
        "section" => Command::GoToSection(parse_index(words.next(), verb)?),
        "pick" => Command::PickChallenge(parse_index(words.next(), verb)?),
        "hidden" => Command::PageHidden,
        "resume" => Command::ResumeMedia,
        "submit" => Command::Submit {
            file_ref: words.next().map(str::to_owned),
        },
        "status" | "s" => Command::Status,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(command))
}

fn parse_index(raw: Option<&str>, verb: &str) -> Result<usize, String> {
    raw.and_then(|v| v.parse().ok())
        .ok_or_else(|| format!("{verb} needs a number"))
}

fn seconds(value: Option<u32>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v}s"))
}

fn print_status(status: &SessionStatus) {
    let question = status
        .question
        .as_ref()
        .map_or_else(|| "-".into(), ToString::to_string);
    println!(
        "{question} (section {}) | question {} | section {} | test {}s",
        status.position.section + 1,
        seconds(status.question_remaining),
        seconds(status.section_remaining),
        status.test_remaining,
    );
    println!(
        "answered {} | visited {} | review {} | tab switches {} | concentration {}",
        status.counts.answered,
        status.counts.visited_unanswered,
        status.counts.marked_for_review,
        status.tab_switches,
        status.concentration_score,
    );
    if let Some(numbers) = status.challenge {
        println!("verification pending: {numbers:?}");
    }
    if status.media_paused {
        println!("media paused, type `resume` to continue");
    }
    if status.submission != SubmissionState::Active {
        println!("submission: {:?}", status.submission);
    }
}

fn report(session: &AttemptSession) {
    match session.submission() {
        SubmissionState::Closed => println!("attempt {} submitted", session.attempt_id()),
        SubmissionState::SubmitFailed { attempts } => println!(
            "attempt {} could not be submitted after {attempts} tries; answers kept locally",
            session.attempt_id()
        ),
        _ => println!(
            "attempt {} saved; rerun with --attempt-id {} to continue",
            session.attempt_id(),
            session.attempt_id()
        ),
    }
}

/// Interactive runs print notices inline; piped runs send them to the log.
fn notifier_for(interactive: bool) -> Arc<dyn Notifier> {
    if !interactive {
        return Arc::new(LogNotifier);
    }
    let (notifier, mut notices) = ChannelNotifier::channel();
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("! {notice}");
        }
    });
    Arc::new(notifier)
}

async fn run_attempt(args: Args, storage: Storage) -> Result<(), Box<dyn std::error::Error>> {
    let path = args.assessment.ok_or(ArgsError::MissingAssessment)?;
    let assessment: Assessment = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let attempt_id = args.attempt_id.unwrap_or_else(AttemptId::generate);

    let config = LoopConfig::from_env()?;
    let api = Arc::new(HttpAttemptApi::new(ApiConfig::from_env()?));
    let clock = Clock::system();
    let notifier = notifier_for(std::io::stdin().is_terminal());

    let attempts = AttemptService::new(storage.clone(), clock, config.session);
    let sync = SyncService::new(
        api.clone(),
        Arc::clone(&storage.announcements),
        notifier.clone(),
        clock,
    );
    let submit = SubmitService::new(
        api,
        Arc::clone(&storage.snapshots),
        notifier.clone(),
        config.retry,
    );

    let session = attempts.resume_or_start(assessment, attempt_id).await?;
    log::info!("attempt {} loaded from {}", session.attempt_id(), path.display());
    println!("attempt {} for {}", session.attempt_id(), session.assessment().name());
    print_status(&SessionStatus::from_session(&session));

    let mut attempt_loop = AttemptLoop::new(session, attempts, sync, submit, notifier);
    if let Some(file_ref) = args.file_ref {
        attempt_loop = attempt_loop.with_file_ref(file_ref);
    }

    let (handle, inbox) = command_channel(16);
    let mut running = tokio::spawn(attempt_loop.run(inbox));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            finished = &mut running => {
                report(&finished??);
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(message) => {
                        eprintln!("{message}");
                        continue;
                    }
                };
                match handle.send(command).await {
                    Ok(status) => print_status(&status),
                    Err(AttemptError::LoopClosed) => {}
                    Err(err) => eprintln!("{err}"),
                }
            }
        }
    }

    drop(handle);
    report(&running.await??);
    Ok(())
}

async fn list_announcements(
    args: Args,
    storage: Storage,
) -> Result<(), Box<dyn std::error::Error>> {
    let attempt_id = args.attempt_id.ok_or(ArgsError::MissingValue {
        flag: "--attempt-id",
    })?;
    let attempts = AttemptService::new(storage, Clock::system(), LoopConfig::default().session);
    for announcement in attempts.announcements(&attempt_id).await? {
        println!("[{}] {}", announcement.received_at, announcement.payload);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Subcommand::Run,
        Some(first) => Subcommand::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite here so the library crates stay free of paths.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;
    log::debug!("local store ready at {}", parsed.db_url);

    match cmd {
        Subcommand::Run => run_attempt(parsed, storage).await,
        Subcommand::Announcements => list_announcements(parsed, storage).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
