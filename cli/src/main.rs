use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use clinic::api::{Id, appointments, auth, consultations, doctors, patients, users};
use clinic::login::{self, LoginResult};
use clinic::storage::{FileStorage, MemoryStorage};
use clinic::types::{
    ApiResponse, ForgotPasswordRequest, LoginRequest, ProfilePicture, RegistrationRequest, ResetPasswordRequest,
    UpdatePasswordRequest,
};
use clinic::{ApiClient, ClientConfig, ClientError, ConfigError, Policy, SessionError, SessionStore};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

const SESSION_FILE_NAME: &str = "session.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.display_message())]
    Client(#[from] ClientError),
    #[error("session storage failed: {0}")]
    Session(#[from] SessionError),
    #[error("login required; sign in first (redirect: {0})")]
    LoginRequired(&'static str),
    #[error("{0}")]
    AuthFailed(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[command(name = "clinic", about = "Clinic appointment API client")]
struct Cli {
    #[arg(long, env = "CLINIC_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CLINIC_SESSION_FILE", help = "Where the signed-in session is kept")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        #[arg(long, env = "CLINIC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    ForgotPassword {
        email: String,
    },
    ResetPassword {
        code: String,
        #[arg(long, env = "CLINIC_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
    Logout,
    Status,
    Users(UsersCommand),
    Patients(PatientsCommand),
    Doctors(DoctorsCommand),
    Appointments(AppointmentsCommand),
    Consultations(ConsultationsCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "CLINIC_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long = "role", help = "Requested role; repeat for several")]
    roles: Vec<String>,
    #[arg(long)]
    license_number: Option<String>,
    #[arg(long)]
    specialization: Option<String>,
}

#[derive(Args, Debug)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    Me,
    Get {
        id: Id,
    },
    List,
    UpdatePassword {
        #[arg(long, env = "CLINIC_PASSWORD", hide_env_values = true)]
        old_password: String,
        #[arg(long, env = "CLINIC_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
    UploadPicture {
        file: PathBuf,
        #[arg(long, help = "MIME type; guessed from the extension when omitted")]
        mime: Option<String>,
    },
}

#[derive(Args, Debug)]
struct PatientsCommand {
    #[command(subcommand)]
    command: PatientsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PatientsSubcommand {
    Me,
    Update {
        #[arg(long)]
        data: String,
    },
    Get {
        id: Id,
    },
    Genotypes,
    BloodGroups,
}

#[derive(Args, Debug)]
struct DoctorsCommand {
    #[command(subcommand)]
    command: DoctorsSubcommand,
}

#[derive(Subcommand, Debug)]
enum DoctorsSubcommand {
    Me,
    Update {
        #[arg(long)]
        data: String,
    },
    List,
    Get {
        id: Id,
    },
    Specializations,
}

#[derive(Args, Debug)]
struct AppointmentsCommand {
    #[command(subcommand)]
    command: AppointmentsSubcommand,
}

#[derive(Subcommand, Debug)]
enum AppointmentsSubcommand {
    Book {
        #[arg(long)]
        data: String,
    },
    List,
    Cancel {
        id: Id,
    },
    Complete {
        id: Id,
    },
}

#[derive(Args, Debug)]
struct ConsultationsCommand {
    #[command(subcommand)]
    command: ConsultationsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ConsultationsSubcommand {
    Create {
        #[arg(long)]
        data: String,
    },
    ForAppointment {
        appointment_id: Id,
    },
    History {
        patient_id: Id,
    },
}

impl Command {
    /// Guard policy for protected commands; `None` for the public auth flows.
    fn policy(&self) -> Option<Policy> {
        let policy = match self {
            Self::Login { .. }
            | Self::Register(_)
            | Self::ForgotPassword { .. }
            | Self::ResetPassword { .. }
            | Self::Logout
            | Self::Status => return None,
            Self::Users(_) => Policy::Authenticated,
            Self::Patients(cmd) => match cmd.command {
                PatientsSubcommand::Me | PatientsSubcommand::Update { .. } => Policy::PatientOnly,
                PatientsSubcommand::Get { .. } => Policy::DoctorOnly,
                PatientsSubcommand::Genotypes | PatientsSubcommand::BloodGroups => Policy::Authenticated,
            },
            Self::Doctors(cmd) => match cmd.command {
                DoctorsSubcommand::Me | DoctorsSubcommand::Update { .. } => Policy::DoctorOnly,
                _ => Policy::Authenticated,
            },
            Self::Appointments(cmd) => match cmd.command {
                AppointmentsSubcommand::Book { .. } => Policy::PatientOnly,
                AppointmentsSubcommand::Complete { .. } => Policy::DoctorOnly,
                AppointmentsSubcommand::List | AppointmentsSubcommand::Cancel { .. } => Policy::Authenticated,
            },
            Self::Consultations(cmd) => match cmd.command {
                ConsultationsSubcommand::Create { .. } => Policy::DoctorOnly,
                _ => Policy::Authenticated,
            },
        };
        Some(policy)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config.base_url = ClientConfig::new(base_url)?.base_url;
    }
    let session_file = cli.session_file.unwrap_or_else(default_session_file);
    tracing::debug!(base_url = %config.base_url, session_file = %session_file.display(), "starting");
    let session = SessionStore::new(Arc::new(FileStorage::new(session_file)), Arc::new(MemoryStorage::new()));

    if let Some(policy) = cli.command.policy() {
        policy.guard(&session, ()).into_result().map_err(CliError::LoginRequired)?;
    }

    let client = ApiClient::new(config, session)?;
    match cli.command {
        Command::Login { email, password } => run_login(&client, LoginRequest { email, password }).await,
        Command::Register(args) => run_register(&client, args).await,
        Command::ForgotPassword { email } => {
            print_envelope(&auth::forgot_password(&client, &ForgotPasswordRequest { email }).await?)
        }
        Command::ResetPassword { code, new_password } => {
            let request = ResetPasswordRequest { code, new_password };
            print_envelope(&auth::reset_password(&client, &request).await?)
        }
        Command::Logout => {
            login::sign_out(client.session())?;
            print_json(&serde_json::json!({ "signedOut": true }))
        }
        Command::Status => run_status(client.session()),
        Command::Users(cmd) => run_users(&client, cmd).await,
        Command::Patients(cmd) => run_patients(&client, cmd).await,
        Command::Doctors(cmd) => run_doctors(&client, cmd).await,
        Command::Appointments(cmd) => run_appointments(&client, cmd).await,
        Command::Consultations(cmd) => run_consultations(&client, cmd).await,
    }
}

fn default_session_file() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("clinic"))
        .unwrap_or_else(|| PathBuf::from(".clinic"))
        .join(SESSION_FILE_NAME)
}

// =============================================================================
// AUTH
// =============================================================================

async fn run_login(client: &ApiClient, request: LoginRequest) -> Result<(), CliError> {
    match login::sign_in(client, &request).await {
        LoginResult::SignedIn { destination, roles } => {
            cache_profile(client).await;
            print_json(&serde_json::json!({ "destination": destination, "roles": roles }))
        }
        LoginResult::Registered { destination, notice } => {
            print_json(&serde_json::json!({ "destination": destination, "notice": notice }))
        }
        LoginResult::Failed { message } => Err(CliError::AuthFailed(message)),
    }
}

async fn run_register(client: &ApiClient, args: RegisterArgs) -> Result<(), CliError> {
    let request = RegistrationRequest {
        name: args.name,
        email: args.email,
        password: args.password,
        roles: (!args.roles.is_empty()).then_some(args.roles),
        license_number: args.license_number,
        specialization: args.specialization,
    };
    match login::sign_up(client, &request).await {
        LoginResult::SignedIn { destination, roles } => {
            cache_profile(client).await;
            print_json(&serde_json::json!({ "destination": destination, "roles": roles }))
        }
        LoginResult::Registered { destination, notice } => {
            print_json(&serde_json::json!({ "destination": destination, "notice": notice }))
        }
        LoginResult::Failed { message } => Err(CliError::AuthFailed(message)),
    }
}

/// Best effort: `status` shows the cached profile when this succeeds.
async fn cache_profile(client: &ApiClient) {
    let cached = match users::me(client).await {
        Ok(ApiResponse { data: Some(user), .. }) => client.session().cache_user(&user).map_err(CliError::from),
        Ok(_) => Ok(()),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = cached {
        tracing::warn!(error = %e, "could not cache user profile");
    }
}

fn run_status(session: &SessionStore) -> Result<(), CliError> {
    print_json(&serde_json::json!({
        "authenticated": session.is_authenticated(),
        "roles": session.roles(),
        "user": session.cached_user(),
    }))
}

// =============================================================================
// RESOURCES
// =============================================================================

async fn run_users(client: &ApiClient, cmd: UsersCommand) -> Result<(), CliError> {
    let envelope = match cmd.command {
        UsersSubcommand::Me => users::me(client).await?,
        UsersSubcommand::Get { id } => users::by_id(client, id).await?,
        UsersSubcommand::List => users::all(client).await?,
        UsersSubcommand::UpdatePassword { old_password, new_password } => {
            users::update_password(client, &UpdatePasswordRequest { old_password, new_password }).await?
        }
        UsersSubcommand::UploadPicture { file, mime } => {
            let picture = read_picture(&file, mime)?;
            users::upload_profile_picture(client, picture).await?
        }
    };
    print_envelope(&envelope)
}

async fn run_patients(client: &ApiClient, cmd: PatientsCommand) -> Result<(), CliError> {
    match cmd.command {
        PatientsSubcommand::Me => print_envelope(&patients::me(client).await?),
        PatientsSubcommand::Update { data } => {
            let body = parse_data(&data)?;
            print_envelope(&patients::update_me(client, &body).await?)
        }
        PatientsSubcommand::Get { id } => print_envelope(&patients::by_id(client, id).await?),
        PatientsSubcommand::Genotypes => print_envelope(&patients::genotypes(client).await?),
        PatientsSubcommand::BloodGroups => print_envelope(&patients::blood_groups(client).await?),
    }
}

async fn run_doctors(client: &ApiClient, cmd: DoctorsCommand) -> Result<(), CliError> {
    match cmd.command {
        DoctorsSubcommand::Me => print_envelope(&doctors::me(client).await?),
        DoctorsSubcommand::Update { data } => {
            let body = parse_data(&data)?;
            print_envelope(&doctors::update_me(client, &body).await?)
        }
        DoctorsSubcommand::List => print_envelope(&doctors::all(client).await?),
        DoctorsSubcommand::Get { id } => print_envelope(&doctors::by_id(client, id).await?),
        DoctorsSubcommand::Specializations => print_envelope(&doctors::specializations(client).await?),
    }
}

async fn run_appointments(client: &ApiClient, cmd: AppointmentsCommand) -> Result<(), CliError> {
    let envelope = match cmd.command {
        AppointmentsSubcommand::Book { data } => appointments::book(client, &parse_data(&data)?).await?,
        AppointmentsSubcommand::List => appointments::mine(client).await?,
        AppointmentsSubcommand::Cancel { id } => appointments::cancel(client, id).await?,
        AppointmentsSubcommand::Complete { id } => appointments::complete(client, id).await?,
    };
    print_envelope(&envelope)
}

async fn run_consultations(client: &ApiClient, cmd: ConsultationsCommand) -> Result<(), CliError> {
    let envelope = match cmd.command {
        ConsultationsSubcommand::Create { data } => consultations::create(client, &parse_data(&data)?).await?,
        ConsultationsSubcommand::ForAppointment { appointment_id } => {
            consultations::by_appointment(client, appointment_id).await?
        }
        ConsultationsSubcommand::History { patient_id } => {
            consultations::history_for_patient(client, patient_id).await?
        }
    };
    print_envelope(&envelope)
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_data(data: &str) -> Result<Value, CliError> {
    Ok(serde_json::from_str::<Value>(data)?)
}

fn read_picture(path: &Path, mime: Option<String>) -> Result<ProfilePicture, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::ReadFile { path: path.to_owned(), source })?;
    let file_name = path
        .file_name()
        .map_or_else(|| "upload".to_owned(), |name| name.to_string_lossy().into_owned());
    let mime = mime.or_else(|| guess_mime(path).map(str::to_owned));
    Ok(ProfilePicture { file_name, bytes, mime })
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn print_envelope<T: Serialize>(envelope: &ApiResponse<T>) -> Result<(), CliError> {
    print_json(&serde_json::to_value(envelope)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
