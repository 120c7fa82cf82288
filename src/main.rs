use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use evaluation_admin::audit::{AuditAction, AuditEvent};
use evaluation_admin::config::Config;
use evaluation_admin::error::Error;
use evaluation_admin::models::{
    NewEvaluationForm, NewEvaluationResponse, User,
};
use evaluation_admin::predict::PredictionClient;
use evaluation_admin::rbac::Actor;
use evaluation_admin::{db, forms, report, upload};

#[derive(Parser)]
#[command(name = "evaluation-admin")]
#[command(about = "School personnel and evaluation administration", long_about = None)]
struct Cli {
    /// Tracing filter, e.g. `info` or `evaluation_admin=debug`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Email of the user to act as; omit to run as system
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load default roles and realistic seed data
    Seed,
    /// Manage evaluation forms
    #[command(subcommand)]
    Forms(FormCommand),
    /// Submit and list evaluation responses
    #[command(subcommand)]
    Responses(ResponseCommand),
    /// Build the aggregated report for a form
    Report {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Manage personnel, including bulk CSV import and export
    #[command(subcommand)]
    Personnel(PersonnelCommand),
    /// Manage departments
    #[command(subcommand)]
    Departments(DepartmentCommand),
    /// Manage subjects
    #[command(subcommand)]
    Subjects(SubjectCommand),
    /// Manage users
    #[command(subcommand)]
    Users(UserCommand),
    /// List roles and their permissions
    Roles,
    /// Check whether a user holds a permission
    Check {
        #[arg(long)]
        email: String,
        #[arg(long)]
        permission: String,
    },
    /// Show recent audit log entries
    AuditLogs {
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(i64).range(1..))]
        limit: i64,
    },
    /// Ask the model service for a personnel performance prediction
    Predict {
        #[arg(long)]
        personnel: Uuid,
    },
}

#[derive(Subcommand)]
enum FormCommand {
    /// Create a form from a JSON definition
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    List,
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// Delete a form and every response to it
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ResponseCommand {
    /// Submit a response from a JSON file
    Submit {
        #[arg(long)]
        file: PathBuf,
    },
    List {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        semester: Option<String>,
    },
}

#[derive(Subcommand)]
enum PersonnelCommand {
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "teaching")]
        personnel_type: String,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        position: Option<String>,
    },
    List,
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    /// Bulk import personnel from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Validate and report without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Export all personnel as CSV
    Export {
        #[arg(long, default_value = "personnel.csv")]
        out: PathBuf,
    },
    /// Write an empty upload template
    Template {
        #[arg(long, default_value = "personnel-template.csv")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum DepartmentCommand {
    Add {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Subcommand)]
enum SubjectCommand {
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum UserCommand {
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        role: String,
    },
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    // The schema may not exist yet, so init-db never resolves an actor.
    let actor = match (&cli.command, cli.actor.as_deref()) {
        (Commands::InitDb, _) | (_, None) => Actor::system(),
        (_, Some(email)) => db::resolve_actor(&pool, email).await?,
    };
    tracing::debug!(actor = %actor.name, "resolved actor");

    run(cli.command, &pool, &config, &actor).await
}

async fn run(
    command: Commands,
    pool: &PgPool,
    config: &Config,
    actor: &Actor,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            actor.authorize("*")?;
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Forms(command) => run_forms(command, pool, actor).await?,
        Commands::Responses(command) => run_responses(command, pool, actor).await?,
        Commands::Report {
            form,
            semester,
            format,
            out,
        } => {
            actor.authorize("reports:read")?;
            let definition = db::fetch_form(pool, form)
                .await?
                .ok_or_else(|| Error::not_found("evaluation form", form))?;
            let responses = db::fetch_responses(pool, form, semester.as_deref()).await?;
            let built =
                report::build_report(form, Some(&definition), semester.as_deref(), &responses);
            tracing::info!(
                form_id = %form,
                semester = ?semester,
                responses = built.total_responses,
                items = built.items.len(),
                "report built"
            );

            let rendered = match format {
                ReportFormat::Markdown => report::render_markdown(&built),
                ReportFormat::Json => serde_json::to_string_pretty(&built)?,
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Personnel(command) => run_personnel(command, pool, actor).await?,
        Commands::Departments(command) => match command {
            DepartmentCommand::Add { name } => {
                actor.authorize("departments:create")?;
                let id = db::ensure_department(pool, &name).await?;
                db::record_audit(
                    pool,
                    actor,
                    &AuditEvent::new(AuditAction::Create, "department").id(id).detail(&name),
                )
                .await?;
                println!("Department {name} ({id}).");
            }
            DepartmentCommand::List => {
                actor.authorize("departments:read")?;
                for department in db::list_departments(pool).await? {
                    println!("- {} ({})", department.name, department.id);
                }
            }
        },
        Commands::Subjects(command) => match command {
            SubjectCommand::Add {
                code,
                name,
                department,
            } => {
                actor.authorize("subjects:create")?;
                let id = db::insert_subject(pool, &code, &name, department.as_deref()).await?;
                db::record_audit(
                    pool,
                    actor,
                    &AuditEvent::new(AuditAction::Create, "subject").id(id).detail(&code),
                )
                .await?;
                println!("Subject {code} ({id}).");
            }
            SubjectCommand::List => {
                actor.authorize("subjects:read")?;
                for subject in db::list_subjects(pool).await? {
                    println!(
                        "- {} {} ({})",
                        subject.code,
                        subject.name,
                        subject.department.as_deref().unwrap_or("no department")
                    );
                }
            }
        },
        Commands::Users(command) => match command {
            UserCommand::Add { email, name, role } => {
                actor.authorize("users:create")?;
                let roles = db::list_roles(pool).await?;
                if !roles.iter().any(|r| r.name == role) {
                    return Err(Error::not_found("role", &role).into());
                }
                db::insert_user(
                    pool,
                    &User {
                        email: email.clone(),
                        display_name: name,
                        role: role.clone(),
                    },
                )
                .await?;
                db::record_audit(
                    pool,
                    actor,
                    &AuditEvent::new(AuditAction::Create, "user").id(&email).detail(&role),
                )
                .await?;
                println!("User {email} now has role {role}.");
            }
            UserCommand::List => {
                actor.authorize("users:read")?;
                for user in db::list_users(pool).await? {
                    println!("- {} <{}> {}", user.display_name, user.email, user.role);
                }
            }
        },
        Commands::Roles => {
            actor.authorize("roles:read")?;
            for role in db::list_roles(pool).await? {
                println!("- {}: {}", role.name, role.permissions.join(", "));
            }
        }
        Commands::Check { email, permission } => {
            actor.authorize("permissions:read")?;
            let subject = db::resolve_actor(pool, &email).await?;
            match subject.authorize(&permission) {
                Ok(()) => println!("{} may {}.", subject.name, permission),
                Err(err) => println!("{err}."),
            }
        }
        Commands::AuditLogs { limit } => {
            actor.authorize("audit-logs:read")?;
            let entries = db::list_audit_logs(pool, limit).await?;
            if entries.is_empty() {
                println!("No audit entries recorded.");
            }
            for entry in entries {
                println!(
                    "- {} {} {} {}{}{}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.actor,
                    entry.action,
                    entry.entity,
                    entry
                        .entity_id
                        .map(|id| format!(" {id}"))
                        .unwrap_or_default(),
                    entry
                        .detail
                        .map(|detail| format!(": {detail}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Predict { personnel } => {
            actor.authorize("ml:predict")?;
            if !db::personnel_exists(pool, personnel).await? {
                return Err(Error::not_found("personnel", personnel).into());
            }
            let client = PredictionClient::new(config)?;
            let prediction = client.predict_personnel_performance(personnel).await?;
            db::record_audit(
                pool,
                actor,
                &AuditEvent::new(AuditAction::Predict, "personnel")
                    .id(personnel)
                    .detail(format!("prediction {:.3}", prediction.prediction)),
            )
            .await?;
            match prediction.trained_at {
                Some(trained_at) => println!(
                    "Predicted performance {:.3} (model trained {}).",
                    prediction.prediction,
                    trained_at.format("%Y-%m-%d")
                ),
                None => println!("Predicted performance {:.3}.", prediction.prediction),
            }
        }
    }

    Ok(())
}

async fn run_forms(command: FormCommand, pool: &PgPool, actor: &Actor) -> anyhow::Result<()> {
    match command {
        FormCommand::Create { file } => {
            actor.authorize("evaluation-forms:create")?;
            let definition: NewEvaluationForm = read_json(&file)?;
            forms::validate_form(&definition)?;
            let form = db::insert_form(pool, &definition).await?;
            db::record_audit(
                pool,
                actor,
                &AuditEvent::new(AuditAction::Create, "evaluation-form")
                    .id(form.id)
                    .detail(&form.name),
            )
            .await?;
            println!("Created form {} ({}).", form.name, form.id);
        }
        FormCommand::List => {
            actor.authorize("evaluation-forms:read")?;
            let forms = db::list_forms(pool).await?;
            if forms.is_empty() {
                println!("No evaluation forms yet.");
            }
            for form in forms {
                println!(
                    "- {} ({}, {}) {} sections{}",
                    form.name,
                    form.id,
                    form.audience,
                    form.sections.len(),
                    form.semester
                        .map(|semester| format!(", semester {semester}"))
                        .unwrap_or_default()
                );
            }
        }
        FormCommand::Show { id } => {
            actor.authorize("evaluation-forms:read")?;
            let form = db::fetch_form(pool, id)
                .await?
                .ok_or_else(|| Error::not_found("evaluation form", id))?;
            print_json(&form)?;
        }
        FormCommand::Delete { id } => {
            actor.authorize("evaluation-forms:delete")?;
            if !db::delete_form(pool, id).await? {
                return Err(Error::not_found("evaluation form", id).into());
            }
            db::record_audit(
                pool,
                actor,
                &AuditEvent::new(AuditAction::Delete, "evaluation-form").id(id),
            )
            .await?;
            println!("Deleted form {id}.");
        }
    }
    Ok(())
}

async fn run_responses(
    command: ResponseCommand,
    pool: &PgPool,
    actor: &Actor,
) -> anyhow::Result<()> {
    match command {
        ResponseCommand::Submit { file } => {
            actor.authorize("evaluation-form-responses:create")?;
            let submission: NewEvaluationResponse = read_json(&file)?;
            let form = db::fetch_form(pool, submission.form_id)
                .await?
                .ok_or_else(|| Error::not_found("evaluation form", submission.form_id))?;
            forms::validate_response(&form, &submission)?;
            if let Some(evaluatee) = submission.evaluatee_id {
                if !db::personnel_exists(pool, evaluatee).await? {
                    return Err(Error::not_found("personnel", evaluatee).into());
                }
            }
            let id = db::insert_response(pool, &submission).await?;
            db::record_audit(
                pool,
                actor,
                &AuditEvent::new(AuditAction::Submit, "evaluation-form-response")
                    .id(id)
                    .detail(format!("form {} semester {}", form.id, submission.semester)),
            )
            .await?;
            println!("Recorded response {id} for {}.", form.name);
        }
        ResponseCommand::List { form, semester } => {
            actor.authorize("evaluation-form-responses:read")?;
            let responses = db::fetch_responses(pool, form, semester.as_deref()).await?;
            if responses.is_empty() {
                println!("No responses found.");
            }
            for response in responses {
                println!(
                    "- {} {} <{}> semester {}, {} answers",
                    response.created_at.format("%Y-%m-%d"),
                    response.respondent_name,
                    response.respondent_email,
                    response.semester,
                    response.answers.len()
                );
            }
        }
    }
    Ok(())
}

async fn run_personnel(
    command: PersonnelCommand,
    pool: &PgPool,
    actor: &Actor,
) -> anyhow::Result<()> {
    match command {
        PersonnelCommand::Add {
            first_name,
            last_name,
            email,
            personnel_type,
            department,
            position,
        } => {
            actor.authorize("personnel:create")?;
            let person = upload::validate_personnel(upload::PersonnelRow {
                first_name,
                last_name,
                email,
                personnel_type: Some(personnel_type),
                department,
                position,
            })
            .map_err(Error::Validation)?;
            let mut conn = pool.acquire().await?;
            match db::insert_personnel(&mut conn, &person).await? {
                Some(id) => {
                    db::record_audit(
                        pool,
                        actor,
                        &AuditEvent::new(AuditAction::Create, "personnel")
                            .id(id)
                            .detail(&person.email),
                    )
                    .await?;
                    println!("Added {} {} ({id}).", person.first_name, person.last_name);
                }
                None => println!("Personnel with email {} already exists.", person.email),
            }
        }
        PersonnelCommand::List => {
            actor.authorize("personnel:read")?;
            for person in db::list_personnel(pool).await? {
                println!(
                    "- {} <{}> {} {}{}",
                    person.full_name(),
                    person.email,
                    person.personnel_type,
                    person.department.as_deref().unwrap_or("no department"),
                    person
                        .position
                        .map(|position| format!(", {position}"))
                        .unwrap_or_default()
                );
            }
        }
        PersonnelCommand::Delete { id } => {
            actor.authorize("personnel:delete")?;
            if !db::delete_personnel(pool, id).await? {
                return Err(Error::not_found("personnel", id).into());
            }
            db::record_audit(pool, actor, &AuditEvent::new(AuditAction::Delete, "personnel").id(id))
                .await?;
            println!("Deleted personnel {id}.");
        }
        PersonnelCommand::Import { csv, dry_run } => {
            actor.authorize("personnel:import")?;
            let existing = db::personnel_emails(pool).await?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let mut plan = upload::plan_upload(file, &existing)?;

            if !dry_run {
                let already_present = db::apply_upload(pool, &plan).await?;
                plan.summary.mark_already_present(&already_present);
                db::record_audit(
                    pool,
                    actor,
                    &AuditEvent::new(AuditAction::Import, "personnel").detail(format!(
                        "{}: created {}, skipped {}, failed {}, total {}",
                        csv.display(),
                        plan.summary.created,
                        plan.summary.skipped,
                        plan.summary.failed,
                        plan.summary.total
                    )),
                )
                .await?;
            }

            print_json(&plan.summary)?;
        }
        PersonnelCommand::Export { out } => {
            actor.authorize("personnel:export")?;
            let personnel = db::list_personnel(pool).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            upload::write_personnel(file, &personnel)?;
            println!("Exported {} personnel to {}.", personnel.len(), out.display());
        }
        PersonnelCommand::Template { out } => {
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            upload::write_template(file)?;
            println!("Template written to {}.", out.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_log_limit_must_be_positive() {
        let parsed = Cli::try_parse_from(["evaluation-admin", "audit-logs", "--limit", "0"]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from(["evaluation-admin", "audit-logs", "--limit", "3"])
            .expect("parse");
        assert!(matches!(cli.command, Commands::AuditLogs { limit: 3 }));
    }

    #[test]
    fn audit_log_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["evaluation-admin", "audit-logs"]).expect("parse");
        assert!(matches!(cli.command, Commands::AuditLogs { limit: 20 }));
    }
}
