//! Terminal controller for Campaign Studio.
//!
//! Every invocation opens the JSON store, seeds the default account, runs one
//! command and exits. The session marker and the active-campaign pointer live
//! in the store, so `login` in one invocation carries over to the next.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use studio::campaigns::{AssetKind, Campaign, CampaignStore};
use studio::clock::SystemClock;
use studio::config::{ConfigError, StudioConfig};
use studio::editor::{EditorSchema, TemplatedEditor};
use studio::router::{RouteError, Screen, ScreenActivated, ScreenHandle, ScreenRouter};
use studio::session::{self, SessionManager, SessionState};
use studio::storage::{FileStore, Storage};
use studio::users::{self, UserError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Signup(#[from] UserError),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("not signed in; run `studio login <username> <password>` first")]
    NotSignedIn,
    #[error("no active campaign; run `studio campaign activate <id>` first")]
    NoActiveCampaign,
    #[error("no campaign with id {0}")]
    UnknownCampaign(String),
    #[error("campaign could not be created; the name must not be blank")]
    CampaignNotCreated,
    #[error("unknown {asset} template `{template}`")]
    UnknownTemplate { asset: AssetKind, template: String },
    #[error("unknown {asset} field `{field}`")]
    UnknownField { asset: AssetKind, field: String },
    #[error("expected FIELD=VALUE, got `{0}`")]
    InvalidAssignment(String),
    #[error("{0}")]
    Route(#[from] RouteError),
    #[error("the store at {0} could not be written")]
    WriteFailed(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "studio", about = "Campaign Studio: author banners, emails and landing pages")]
struct Cli {
    /// JSON file holding users, session and campaigns.
    #[arg(long, env = "STUDIO_STORE_PATH")]
    store: Option<PathBuf>,

    /// Prefix for every storage key.
    #[arg(long, env = "STUDIO_KEY_PREFIX")]
    key_prefix: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and sign in.
    Signup { username: String, password: String },
    Login { username: String, password: String },
    Logout,
    Whoami,
    Campaign(CampaignCommand),
    /// List the templates of an asset editor.
    Templates { asset: AssetKind },
    /// Edit an asset of the active campaign.
    Edit(EditArgs),
    /// Print the rendered preview of an asset of the active campaign.
    Preview { asset: AssetKind },
    /// Navigate to a screen and print what it shows.
    Screen { id: String },
    /// Print the resolved configuration.
    Config,
}

#[derive(Args, Debug)]
struct CampaignCommand {
    #[command(subcommand)]
    command: CampaignSubcommand,
}

#[derive(Subcommand, Debug)]
enum CampaignSubcommand {
    Create {
        name: String,
        /// Make the new campaign the active one.
        #[arg(long, default_value_t = false)]
        activate: bool,
    },
    List,
    Activate { id: String },
    /// Print the active campaign record as JSON.
    Show,
}

#[derive(Args, Debug)]
struct EditArgs {
    asset: AssetKind,

    /// Apply this template before setting fields.
    #[arg(long)]
    template: Option<String>,

    /// FIELD=VALUE, repeatable.
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    assignments: Vec<String>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<String, CliError> {
    let config = apply_overrides(StudioConfig::from_env()?, &cli);
    Studio::open(config).run(cli.command)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn apply_overrides(mut config: StudioConfig, cli: &Cli) -> StudioConfig {
    if let Some(store) = &cli.store {
        config.store_path.clone_from(store);
    }
    if let Some(prefix) = &cli.key_prefix {
        config.key_prefix.clone_from(prefix);
    }
    config
}

// =============================================================================
// STUDIO
// =============================================================================

struct Studio {
    storage: Storage<FileStore>,
    clock: SystemClock,
    config: StudioConfig,
}

impl Studio {
    fn open(config: StudioConfig) -> Self {
        let storage = Storage::with_namespace(FileStore::new(&config.store_path), config.key_prefix.clone());
        users::seed_default(&storage, &config.default_user);
        Self { storage, clock: SystemClock, config }
    }

    fn campaigns(&self) -> CampaignStore<'_, FileStore, SystemClock> {
        CampaignStore::new(&self.storage, &self.clock)
    }

    fn run(&self, command: Command) -> Result<String, CliError> {
        match command {
            Command::Signup { username, password } => {
                SessionManager::new().signup(&self.storage, &username, &password)?;
                Ok(format!("signed up and signed in as {}", username.trim()))
            }
            Command::Login { username, password } => {
                if !SessionManager::new().login(&self.storage, &username, &password) {
                    return Err(CliError::InvalidCredentials);
                }
                Ok(format!("signed in as {}", username.trim()))
            }
            Command::Logout => {
                if !SessionManager::new().logout(&self.storage) {
                    return Err(self.write_failed());
                }
                Ok("signed out".to_owned())
            }
            Command::Config => Ok(format_config(&self.config)),
            Command::Whoami => Ok(session::current(&self.storage)
                .username()
                .map_or_else(|| "not signed in".to_owned(), str::to_owned)),
            Command::Campaign(campaign) => {
                self.require_session()?;
                self.run_campaign(campaign.command)
            }
            Command::Templates { asset } => Ok(format_templates(EditorSchema::for_asset(asset))),
            Command::Edit(args) => {
                self.require_session()?;
                self.run_edit(args)
            }
            Command::Preview { asset } => {
                self.require_session()?;
                let mut editor = TemplatedEditor::for_asset(asset);
                editor.load(&self.campaigns());
                Ok(editor.render_preview())
            }
            Command::Screen { id } => self.run_screen(&id),
        }
    }

    fn require_session(&self) -> Result<SessionState, CliError> {
        let state = session::current(&self.storage);
        if state.is_signed_in() { Ok(state) } else { Err(CliError::NotSignedIn) }
    }

    fn write_failed(&self) -> CliError {
        CliError::WriteFailed(self.config.store_path.display().to_string())
    }

    fn run_campaign(&self, command: CampaignSubcommand) -> Result<String, CliError> {
        let store = self.campaigns();
        match command {
            CampaignSubcommand::Create { name, activate } => {
                let mut campaign = store.create(&name).ok_or(CliError::CampaignNotCreated)?;
                if activate && !store.set_active(&mut campaign) {
                    return Err(self.write_failed());
                }
                Ok(format!("created campaign {} ({})", campaign.id, campaign.name))
            }
            CampaignSubcommand::List => {
                Ok(format_campaigns(&store.list_all(), store.active_id().as_deref()))
            }
            CampaignSubcommand::Activate { id } => {
                let mut campaign = store.load(&id).ok_or(CliError::UnknownCampaign(id))?;
                if !store.set_active(&mut campaign) {
                    return Err(self.write_failed());
                }
                Ok(format!("active campaign: {}", campaign.name))
            }
            CampaignSubcommand::Show => {
                let campaign = store.active().ok_or(CliError::NoActiveCampaign)?;
                Ok(serde_json::to_string_pretty(&campaign)?)
            }
        }
    }

    fn run_edit(&self, args: EditArgs) -> Result<String, CliError> {
        let store = self.campaigns();
        let campaign = store.active().ok_or(CliError::NoActiveCampaign)?;
        let assignments = args
            .assignments
            .iter()
            .map(|raw| parse_assignment(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut editor = TemplatedEditor::for_asset(args.asset);
        editor.load(&store);
        if let Some(template) = args.template {
            if !editor.apply_template(&template) {
                return Err(CliError::UnknownTemplate { asset: args.asset, template });
            }
        }
        for (field, value) in assignments {
            if !editor.set_field(&field, value) {
                return Err(CliError::UnknownField { asset: args.asset, field });
            }
        }
        if !editor.save(&store) {
            return Err(self.write_failed());
        }

        let mut out = format!("saved {} for {}\n", args.asset.label(), campaign.name);
        out.push_str(&format_editor(&editor));
        Ok(out)
    }

    fn run_screen(&self, id: &str) -> Result<String, CliError> {
        let state = session::current(&self.storage);
        let mut router = ScreenRouter::new(ActivationLog);
        for screen in Screen::ALL {
            router.register(screen, Pane::default());
        }
        router.set_shell(Pane::default());
        router.on_session_changed(&state);
        let shown = router.go_to_id(id, &state)?;

        let mut out = String::new();
        if shown.id() != id {
            writeln!(out, "redirected to {shown}").ok();
        }
        out.push_str(&self.describe(shown));
        Ok(out)
    }

    fn describe(&self, screen: Screen) -> String {
        let store = self.campaigns();
        match screen {
            Screen::Login => "sign in with `studio login <username> <password>`".to_owned(),
            Screen::Dashboard => format_campaigns(&store.list_all(), store.active_id().as_deref()),
            editor_screen => {
                let Some(kind) = editor_screen.asset() else {
                    return String::new();
                };
                let mut editor = TemplatedEditor::for_asset(kind);
                editor.load(&store);
                format_editor(&editor)
            }
        }
    }
}

// =============================================================================
// SCREENS
// =============================================================================

#[derive(Debug, Default)]
struct Pane {
    visible: bool,
}

impl ScreenHandle for Pane {
    fn show(&mut self) {
        self.visible = true;
    }

    fn hide(&mut self) {
        self.visible = false;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Logs each activation; the CLI prints only the final screen.
#[derive(Debug, Default)]
struct ActivationLog;

impl ScreenActivated for ActivationLog {
    fn screen_activated(&mut self, screen: Screen) {
        tracing::debug!(%screen, "screen activated");
    }
}

// =============================================================================
// FORMATTING
// =============================================================================

fn parse_assignment(raw: &str) -> Result<(String, String), CliError> {
    let Some((field, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidAssignment(raw.to_owned()));
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_owned()));
    }
    Ok((field.to_owned(), value.to_owned()))
}

fn format_timestamp(ms: i64) -> String {
    let nanos = i128::from(ms) * 1_000_000;
    match OffsetDateTime::from_unix_timestamp_nanos(nanos).map(|at| at.format(&Rfc3339)) {
        Ok(Ok(formatted)) => formatted,
        _ => ms.to_string(),
    }
}

fn format_campaigns(campaigns: &[Campaign], active_id: Option<&str>) -> String {
    if campaigns.is_empty() {
        return "no campaigns yet; run `studio campaign create <name>`".to_owned();
    }
    let mut out = String::new();
    for campaign in campaigns {
        let marker = if Some(campaign.id.as_str()) == active_id { '*' } else { ' ' };
        writeln!(
            out,
            "{marker} {id}  {status:<5}  {saved}/3  {updated}  {name}",
            id = campaign.id,
            status = campaign.status.label(),
            saved = campaign.assets.saved_count(),
            updated = format_timestamp(campaign.last_updated),
            name = campaign.name,
        )
        .ok();
    }
    out.trim_end().to_owned()
}

fn format_templates(schema: &EditorSchema) -> String {
    schema
        .templates
        .iter()
        .map(|template| format!("{}  {}", template.id, template.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_config(config: &StudioConfig) -> String {
    let prefix = if config.key_prefix.is_empty() { "(none)" } else { config.key_prefix.as_str() };
    format!(
        "store: {}\nkey prefix: {prefix}\ndefault user: {}\nsend endpoint: {}",
        config.store_path.display(),
        config.default_user.username,
        config.send_endpoint.as_deref().unwrap_or("(not configured)"),
    )
}

fn format_editor(editor: &TemplatedEditor) -> String {
    let mut out = format!("template: {}\n", editor.template_id());
    for field in editor.schema().fields {
        writeln!(out, "{}: {}", field.label, editor.value(field.name).unwrap_or_default()).ok();
    }
    out.trim_end().to_owned()
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
