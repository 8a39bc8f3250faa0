// `setup-wizard` command
//
// Interactive mode creates the first administrator on the terminal. Headless mode issues a
// one-time setup token and leaves account creation to the web flow.
//
// IMPORTANT:
// - The plaintext token is printed to `out` only; it never reaches a log line.
// - Every state change goes through `InstallationService`.

pub mod prompt;

use clap::Args;
use log::{info, warn};
use std::io::Write;
use url::Url;

use crate::config::Settings;
use crate::database::accounts::AdminAccount;
use crate::error::{SetupError, SetupResult};
use crate::installation::InstallationService;
use crate::models::requests::NewAdmin;
use crate::utils::validation::{validate_display_name, validate_email, validate_username};

use prompt::Prompter;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Clone, Default, Args)]
pub struct SetupWizardArgs {
    /// Issue a one-time setup token instead of prompting for the administrator
    #[arg(long)]
    pub headless: bool,

    /// Do not apply pending database migrations
    #[arg(long)]
    pub skip_migrations: bool,

    /// Run even if installation is already complete or an administrator exists
    #[arg(long)]
    pub force: bool,

    /// Setup token lifetime in hours (defaults to `token_expiry_hours` from the configuration)
    #[arg(long, value_name = "HOURS", value_parser = clap::value_parser!(i64).range(1..))]
    pub token_expires: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardOutcome {
    /// Interactive mode created the administrator and marked installation complete.
    Completed { admin_id: i64 },
    /// Headless mode issued a token; completion happens through the web flow.
    TokenIssued,
    /// Nothing to do; installation was already complete.
    AlreadyComplete,
    /// The operator declined to continue past existing administrators.
    Declined,
}

/// Process exit status for a wizard run.
pub fn exit_code(result: &SetupResult<WizardOutcome>) -> u8 {
    match result {
        Ok(_) => EXIT_OK,
        Err(SetupError::Cancelled) => EXIT_CANCELLED,
        Err(_) => EXIT_FAILURE,
    }
}

/// `{public_url}/setup/?token=...`, keeping any path prefix of `public_url`.
pub fn setup_url(public_url: &str, token: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(public_url)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("public_url {:?} cannot be used as a base URL", public_url))?
        .pop_if_empty()
        .push("setup")
        .push("");
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url.to_string())
}

pub struct SetupWizard<'a> {
    service: &'a InstallationService,
    settings: &'a Settings,
    out: &'a mut dyn Write,
    prompter: &'a mut dyn Prompter,
}

impl<'a> SetupWizard<'a> {
    pub fn new(
        service: &'a InstallationService,
        settings: &'a Settings,
        out: &'a mut dyn Write,
        prompter: &'a mut dyn Prompter,
    ) -> Self {
        Self {
            service,
            settings,
            out,
            prompter,
        }
    }

    fn say(&mut self, line: impl AsRef<str>) -> SetupResult<()> {
        writeln!(self.out, "{}", line.as_ref())?;
        Ok(())
    }

    pub async fn run(&mut self, args: &SetupWizardArgs) -> SetupResult<WizardOutcome> {
        info!(
            "[PHASE: cli] [STEP: start] Setup wizard started (headless={}, skip_migrations={}, force={})",
            args.headless, args.skip_migrations, args.force
        );

        if !args.force && self.service.is_installation_complete().await {
            self.report_already_complete().await?;
            return Ok(WizardOutcome::AlreadyComplete);
        }

        self.system_checks(args).await?;

        let admins = self.service.list_admins().await?;
        let mut allow_existing_admin = args.force;
        if !admins.is_empty() && !args.force {
            self.say("Existing administrator accounts:")?;
            self.list(&admins)?;
            if args.headless {
                warn!("[PHASE: cli] [STEP: checks] Administrator already exists, refusing to issue a token");
                return Err(SetupError::AdminExists);
            }
            if !self.prompter.confirm("Continue anyway?", false)? {
                self.say("Setup cancelled; nothing was changed.")?;
                return Ok(WizardOutcome::Declined);
            }
            allow_existing_admin = true;
        }

        if args.headless {
            self.issue_token(args).await
        } else {
            self.create_interactively(allow_existing_admin).await
        }
    }

    async fn report_already_complete(&mut self) -> SetupResult<()> {
        info!("[PHASE: cli] [STEP: start] Installation already complete, nothing to do");
        self.say("Installation is already complete.")?;
        match self.service.list_admins().await {
            Ok(admins) if admins.is_empty() => self.say("No administrator accounts found.")?,
            Ok(admins) => {
                self.say("Administrator accounts:")?;
                self.list(&admins)?;
            }
            Err(e) => self.say(format!("Could not list administrators: {}", e))?,
        }
        self.say("Run with --force to set up again.")
    }

    fn list(&mut self, admins: &[AdminAccount]) -> SetupResult<()> {
        for admin in admins {
            self.say(format!("  - {}", admin.display()))?;
        }
        Ok(())
    }

    async fn system_checks(&mut self, args: &SetupWizardArgs) -> SetupResult<()> {
        self.say("Checking database connection...")?;
        self.service.accounts().ping().await?;
        self.say("  Database reachable.")?;

        if args.skip_migrations {
            let pending = self.service.accounts().pending_migrations().await?;
            if !pending.is_empty() {
                warn!(
                    "[PHASE: cli] [STEP: migrations] {} migration(s) pending but skipped",
                    pending.len()
                );
                self.say(format!(
                    "  Skipping {} pending migration(s); setup may fail.",
                    pending.len()
                ))?;
            }
            return Ok(());
        }

        self.say("Applying database migrations...")?;
        let applied = self.service.apply_migrations().await?;
        if applied.is_empty() {
            self.say("  No pending migrations.")
        } else {
            for name in &applied {
                self.say(format!("  Applied {}", name))?;
            }
            Ok(())
        }
    }

    async fn issue_token(&mut self, args: &SetupWizardArgs) -> SetupResult<WizardOutcome> {
        let hours = args
            .token_expires
            .unwrap_or(self.settings.token_expiry_hours);
        let issued = self.service.generate_setup_token(hours).await?;
        let url = setup_url(&self.settings.public_url, &issued.plaintext)?;

        self.say("")?;
        self.say("Setup token generated.")?;
        self.say(format!("  Token:   {}", issued.plaintext))?;
        self.say(format!("  URL:     {}", url))?;
        self.say(format!(
            "  Expires: {} ({} hour(s))",
            issued.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            hours
        ))?;
        self.say("")?;
        self.say("Open the URL in a browser to create the administrator account.")?;
        self.say("The token can be used once; run this command again to replace it.")?;

        info!(
            "[PHASE: cli] [STEP: token] Setup token issued (expires_at={})",
            issued.expires_at.to_rfc3339()
        );
        Ok(WizardOutcome::TokenIssued)
    }

    async fn create_interactively(&mut self, allow_existing_admin: bool) -> SetupResult<WizardOutcome> {
        self.say("")?;
        self.say("Create the administrator account")?;

        let username = loop {
            let value = self.prompter.input("Username", false)?.trim().to_string();
            if let Err(failure) = validate_username(&value) {
                self.say(format!("  {}", failure.reason))?;
                continue;
            }
            if self.service.accounts().username_exists(&value).await? {
                self.say(format!("  Username {:?} is already taken.", value))?;
                continue;
            }
            break value;
        };

        let email = loop {
            let value = self.prompter.input("Email", false)?.trim().to_string();
            if let Err(failure) = validate_email(&value) {
                self.say(format!("  {}", failure.reason))?;
                continue;
            }
            if self.service.accounts().email_exists(&value).await? {
                self.say(format!("  Email {:?} is already in use.", value))?;
                continue;
            }
            break value;
        };

        let first_name = self.optional_name("first_name", "First name (optional)")?;
        let last_name = self.optional_name("last_name", "Last name (optional)")?;

        let password = loop {
            let value = self.prompter.password("Password")?;
            if let Err(failure) = self.service.password_policy().validate(&value, &username) {
                self.say(format!("  {}", failure.reason))?;
                continue;
            }
            let confirmation = self.prompter.password("Password (again)")?;
            if confirmation != value {
                self.say("  Passwords do not match.")?;
                continue;
            }
            break value;
        };

        let admin = NewAdmin::new(username, email, password).with_names(first_name, last_name);
        self.say("Creating administrator...")?;
        let account = self
            .service
            .create_admin_user(&admin, allow_existing_admin)
            .await?;
        let record = self
            .service
            .mark_installation_complete(Some(account.id))
            .await?;

        info!(
            "[PHASE: cli] [STEP: complete] Interactive setup finished (admin_id={}, installation_id={})",
            account.id, record.installation_id
        );

        self.say("")?;
        self.say("Setup complete.")?;
        self.say(format!("  Administrator:   {}", account.display()))?;
        self.say(format!("  Installation id: {}", record.installation_id))?;
        self.say("")?;
        self.say("Next steps:")?;
        self.say("  1. Start the application: barody-setup serve")?;
        self.say(format!(
            "  2. Sign in at {}/admin/",
            self.settings.public_url.trim_end_matches('/')
        ))?;
        self.say("  3. Configure an assistant and review the site settings.")?;

        Ok(WizardOutcome::Completed {
            admin_id: account.id,
        })
    }

    fn optional_name(&mut self, field: &str, prompt: &str) -> SetupResult<String> {
        loop {
            let value = self.prompter.input(prompt, true)?.trim().to_string();
            match validate_display_name(field, &value) {
                Ok(()) => return Ok(value),
                Err(failure) => self.say(format!("  {}", failure.reason))?,
            }
        }
    }
}
