use std::collections::HashSet;

use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::error::{Error, Result};
use crate::models::{
    Answer, AuditLogEntry, Audience, Department, EvaluationForm, EvaluationResponse,
    NewEvaluationForm, NewEvaluationResponse, NewPersonnel, Personnel, Role, ScaleOption, Section,
    Subject, User,
};
use crate::rbac::{self, Actor};
use crate::upload::UploadPlan;

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> Result<()> {
    for role in rbac::default_roles() {
        upsert_role(pool, &role).await?;
    }
    insert_user(
        pool,
        &User {
            email: "admin@school.test".to_string(),
            display_name: "School Administrator".to_string(),
            role: "admin".to_string(),
        },
    )
    .await?;

    let people = vec![
        (
            "Avery",
            "Lee",
            "avery.lee@school.test",
            Audience::Teaching,
            "Mathematics",
            "Teacher III",
        ),
        (
            "Jules",
            "Moreno",
            "jules.moreno@school.test",
            Audience::Teaching,
            "Science",
            "Teacher I",
        ),
        (
            "Kiara",
            "Patel",
            "kiara.patel@school.test",
            Audience::NonTeaching,
            "Registrar",
            "Records Officer",
        ),
    ];
    let mut conn = pool.acquire().await?;
    for (first_name, last_name, email, personnel_type, department, position) in people {
        insert_personnel(
            &mut conn,
            &NewPersonnel {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                email: email.to_string(),
                personnel_type,
                department: Some(department.to_string()),
                position: Some(position.to_string()),
            },
        )
        .await?;
    }

    let form_id = Uuid::parse_str("6f1c1f0e-5b1d-4c38-9d0c-2f0d7f4b6a11")
        .map_err(|err| Error::Validation(err.to_string()))?;
    let scale = [
        (1, "Poor"),
        (2, "Fair"),
        (3, "Satisfactory"),
        (4, "Very Satisfactory"),
        (5, "Outstanding"),
    ]
    .into_iter()
    .map(|(value, label)| ScaleOption {
        value,
        label: label.to_string(),
    })
    .collect::<Vec<_>>();
    sqlx::query(
        r#"
        INSERT INTO evaluation_admin.evaluation_forms
        (id, name, audience, sections, scale, semester, school_year)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(form_id)
    .bind("Faculty Performance Evaluation")
    .bind(Audience::Teaching.as_str())
    .bind(Json(vec![Section {
        title: "Teaching Effectiveness".to_string(),
        items: vec![
            "Explains lessons clearly".to_string(),
            "Uses class time well".to_string(),
        ],
    }]))
    .bind(Json(scale))
    .bind("1st")
    .bind("2026-2027")
    .execute(pool)
    .await?;

    let responses = vec![
        ("Rae Cruz", "rae.cruz@school.test", 5, 5),
        ("Sam Ocampo", "sam.ocampo@school.test", 4, 5),
        ("Lia Santos", "lia.santos@school.test", 3, 4),
    ];
    let existing: i64 = sqlx::query(
        "SELECT COUNT(*) AS total FROM evaluation_admin.evaluation_form_responses \
         WHERE form_id = $1",
    )
    .bind(form_id)
    .fetch_one(pool)
    .await?
    .try_get("total")?;
    if existing == 0 {
        for (name, email, clarity, time) in responses {
            insert_response(
                pool,
                &NewEvaluationResponse {
                    form_id,
                    respondent_name: name.to_string(),
                    respondent_email: email.to_string(),
                    evaluatee_id: None,
                    semester: "1st".to_string(),
                    answers: vec![
                        Answer {
                            section: "Teaching Effectiveness".to_string(),
                            item: "Explains lessons clearly".to_string(),
                            score: clarity,
                        },
                        Answer {
                            section: "Teaching Effectiveness".to_string(),
                            item: "Uses class time well".to_string(),
                            score: time,
                        },
                    ],
                },
            )
            .await?;
        }
    }

    Ok(())
}

fn parse_audience(row: &PgRow, column: &str) -> Result<Audience> {
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn form_from_row(row: &PgRow) -> Result<EvaluationForm> {
    let sections: Json<Vec<Section>> = row.try_get("sections")?;
    let scale: Json<Vec<ScaleOption>> = row.try_get("scale")?;
    Ok(EvaluationForm {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        audience: parse_audience(row, "audience")?,
        sections: sections.0,
        scale: scale.0,
        semester: row.try_get("semester")?,
        school_year: row.try_get("school_year")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert_form(pool: &PgPool, form: &NewEvaluationForm) -> Result<EvaluationForm> {
    let row = sqlx::query(
        r#"
        INSERT INTO evaluation_admin.evaluation_forms
        (id, name, audience, sections, scale, semester, school_year)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, name, audience, sections, scale, semester, school_year, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(form.name.trim())
    .bind(form.audience.as_str())
    .bind(Json(&form.sections))
    .bind(Json(&form.scale))
    .bind(&form.semester)
    .bind(&form.school_year)
    .fetch_one(pool)
    .await?;

    form_from_row(&row)
}

pub async fn fetch_form(pool: &PgPool, id: Uuid) -> Result<Option<EvaluationForm>> {
    let row = sqlx::query(
        "SELECT id, name, audience, sections, scale, semester, school_year, created_at \
         FROM evaluation_admin.evaluation_forms WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(form_from_row).transpose()
}

pub async fn list_forms(pool: &PgPool) -> Result<Vec<EvaluationForm>> {
    let rows = sqlx::query(
        "SELECT id, name, audience, sections, scale, semester, school_year, created_at \
         FROM evaluation_admin.evaluation_forms ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(form_from_row).collect()
}

/// Deletes the form and, through the foreign key, its responses.
pub async fn delete_form(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM evaluation_admin.evaluation_forms WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_response(pool: &PgPool, response: &NewEvaluationResponse) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO evaluation_admin.evaluation_form_responses
        (id, form_id, respondent_name, respondent_email, evaluatee_id, semester, answers)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(response.form_id)
    .bind(response.respondent_name.trim())
    .bind(response.respondent_email.trim())
    .bind(response.evaluatee_id)
    .bind(response.semester.trim())
    .bind(Json(&response.answers))
    .execute(pool)
    .await?;
    Ok(id)
}

/// Responses for a form in submission order, optionally narrowed to one
/// semester by exact match.
pub async fn fetch_responses(
    pool: &PgPool,
    form_id: Uuid,
    semester: Option<&str>,
) -> Result<Vec<EvaluationResponse>> {
    let mut query = String::from(
        "SELECT id, form_id, respondent_name, respondent_email, evaluatee_id, semester, \
         answers, created_at \
         FROM evaluation_admin.evaluation_form_responses \
         WHERE form_id = $1",
    );
    if semester.is_some() {
        query.push_str(" AND semester = $2");
    }
    query.push_str(" ORDER BY created_at, id");

    let mut rows = sqlx::query(&query).bind(form_id);
    if let Some(value) = semester {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    tracing::debug!(%form_id, ?semester, count = records.len(), "fetched responses");

    let mut responses = Vec::with_capacity(records.len());
    for row in records {
        let answers: Json<Vec<Answer>> = row.try_get("answers")?;
        responses.push(EvaluationResponse {
            id: row.try_get("id")?,
            form_id: row.try_get("form_id")?,
            respondent_name: row.try_get("respondent_name")?,
            respondent_email: row.try_get("respondent_email")?,
            evaluatee_id: row.try_get("evaluatee_id")?,
            semester: row.try_get("semester")?,
            answers: answers.0,
            created_at: row.try_get("created_at")?,
        });
    }

    Ok(responses)
}

pub async fn ensure_department<'e, E: PgExecutor<'e>>(executor: E, name: &str) -> Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO evaluation_admin.departments (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name.trim())
    .fetch_one(executor)
    .await?
    .try_get("id")?;
    Ok(id)
}

pub async fn list_departments(pool: &PgPool) -> Result<Vec<Department>> {
    let rows = sqlx::query("SELECT id, name FROM evaluation_admin.departments ORDER BY name")
        .fetch_all(pool)
        .await?;
    let mut departments = Vec::with_capacity(rows.len());
    for row in rows {
        departments.push(Department {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        });
    }
    Ok(departments)
}

pub async fn insert_subject(
    pool: &PgPool,
    code: &str,
    name: &str,
    department: Option<&str>,
) -> Result<Uuid> {
    let department_id = match department {
        Some(department) => Some(ensure_department(pool, department).await?),
        None => None,
    };
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO evaluation_admin.subjects (id, code, name, department_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (code) DO UPDATE
        SET name = EXCLUDED.name, department_id = EXCLUDED.department_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code.trim())
    .bind(name.trim())
    .bind(department_id)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

pub async fn list_subjects(pool: &PgPool) -> Result<Vec<Subject>> {
    let rows = sqlx::query(
        "SELECT s.id, s.code, s.name, d.name AS department \
         FROM evaluation_admin.subjects s \
         LEFT JOIN evaluation_admin.departments d ON d.id = s.department_id \
         ORDER BY s.code",
    )
    .fetch_all(pool)
    .await?;
    let mut subjects = Vec::with_capacity(rows.len());
    for row in rows {
        subjects.push(Subject {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            department: row.try_get("department")?,
        });
    }
    Ok(subjects)
}

/// Inserts one person. Returns `None` when the email is already taken.
pub async fn insert_personnel(
    conn: &mut PgConnection,
    person: &NewPersonnel,
) -> Result<Option<Uuid>> {
    let department_id = match person.department.as_deref() {
        Some(name) => Some(ensure_department(&mut *conn, name).await?),
        None => None,
    };

    let row = sqlx::query(
        r#"
        INSERT INTO evaluation_admin.personnel
        (id, first_name, last_name, email, personnel_type, department_id, position)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&person.first_name)
    .bind(&person.last_name)
    .bind(crate::upload::normalize_email(&person.email))
    .bind(person.personnel_type.as_str())
    .bind(department_id)
    .bind(&person.position)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| row.try_get::<Uuid, _>("id").map_err(Error::from))
        .transpose()
}

pub async fn list_personnel(pool: &PgPool) -> Result<Vec<Personnel>> {
    let rows = sqlx::query(
        "SELECT p.id, p.first_name, p.last_name, p.email, p.personnel_type, \
         d.name AS department, p.position, p.created_at \
         FROM evaluation_admin.personnel p \
         LEFT JOIN evaluation_admin.departments d ON d.id = p.department_id \
         ORDER BY p.last_name, p.first_name",
    )
    .fetch_all(pool)
    .await?;

    let mut personnel = Vec::with_capacity(rows.len());
    for row in rows {
        personnel.push(Personnel {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            personnel_type: parse_audience(&row, "personnel_type")?,
            department: row.try_get("department")?,
            position: row.try_get("position")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(personnel)
}

pub async fn personnel_exists(pool: &PgPool, id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 AS found FROM evaluation_admin.personnel WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn delete_personnel(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM evaluation_admin.personnel WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn personnel_emails(pool: &PgPool) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT email FROM evaluation_admin.personnel")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("email").map_err(Error::from))
        .collect()
}

/// Writes the planned rows in one transaction. Returns the emails that
/// were already taken by the time their row was written.
pub async fn apply_upload(pool: &PgPool, plan: &UploadPlan) -> Result<Vec<String>> {
    let mut tx = pool.begin().await?;
    let mut already_present = Vec::new();
    for person in &plan.to_create {
        if insert_personnel(&mut tx, person).await?.is_none() {
            tracing::warn!(email = %person.email, "personnel appeared during import, not inserted");
            already_present.push(person.email.clone());
        }
    }
    tx.commit().await?;
    Ok(already_present)
}

pub async fn upsert_role(pool: &PgPool, role: &Role) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_admin.roles (name, permissions)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET permissions = EXCLUDED.permissions
        "#,
    )
    .bind(&role.name)
    .bind(&role.permissions)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_roles(pool: &PgPool) -> Result<Vec<Role>> {
    let rows = sqlx::query("SELECT name, permissions FROM evaluation_admin.roles ORDER BY name")
        .fetch_all(pool)
        .await?;
    let mut roles = Vec::with_capacity(rows.len());
    for row in rows {
        roles.push(Role {
            name: row.try_get("name")?,
            permissions: row.try_get("permissions")?,
        });
    }
    Ok(roles)
}

pub async fn insert_user(pool: &PgPool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_admin.users (email, display_name, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE
        SET display_name = EXCLUDED.display_name, role = EXCLUDED.role
        "#,
    )
    .bind(crate::upload::normalize_email(&user.email))
    .bind(user.display_name.trim())
    .bind(&user.role)
    .execute(pool)
    .await?;
    Ok(())
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role: row.try_get("role")?,
    })
}

pub async fn fetch_user(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT email, display_name, role FROM evaluation_admin.users WHERE email = $1",
    )
    .bind(crate::upload::normalize_email(email))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT email, display_name, role FROM evaluation_admin.users ORDER BY email",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(user_from_row).collect()
}

/// Loads the user and their role's permissions. Unknown users get an
/// actor with no permissions.
pub async fn resolve_actor(pool: &PgPool, email: &str) -> Result<Actor> {
    let user = fetch_user(pool, email).await?;
    let roles = list_roles(pool).await?;
    if user.is_none() {
        tracing::warn!(actor = email, "acting user not found");
    }
    Ok(Actor {
        name: crate::upload::normalize_email(email),
        permissions: rbac::resolve_permissions(user.as_ref(), &roles),
    })
}

pub async fn record_audit(pool: &PgPool, actor: &Actor, event: &AuditEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_admin.audit_logs (id, actor, action, entity, entity_id, detail)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&actor.name)
    .bind(event.action.as_str())
    .bind(event.entity)
    .bind(&event.entity_id)
    .bind(&event.detail)
    .execute(pool)
    .await?;
    tracing::info!(
        actor = %actor.name,
        action = %event.action,
        entity = event.entity,
        entity_id = ?event.entity_id,
        "audit"
    );
    Ok(())
}

pub async fn list_audit_logs(pool: &PgPool, limit: i64) -> Result<Vec<AuditLogEntry>> {
    let rows = sqlx::query(
        "SELECT id, actor, action, entity, entity_id, detail, created_at \
         FROM evaluation_admin.audit_logs ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(AuditLogEntry {
            id: row.try_get("id")?,
            actor: row.try_get("actor")?,
            action: row.try_get("action")?,
            entity: row.try_get("entity")?,
            entity_id: row.try_get("entity_id")?,
            detail: row.try_get("detail")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(entries)
}
