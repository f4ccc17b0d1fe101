use crate::app::AppState;
use crate::auth::password::hash_password;
use crate::auth::session::SessionUser;
use crate::error::{unique_violation, AppError, AppResult, LoggedJson};
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{column_enum, Role};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: i64,
    pub username: String,
    pub fio: String,
    pub iin: Option<String>,
    pub position: Option<String>,
    pub role: Role,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployee {
    pub fio: String,
    pub iin: String,
    pub position: String,
    pub role: Role,
}

/// Account fields for direct inserts (CLI bootstrap and the admin endpoint).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub fio: String,
    pub iin: Option<String>,
    pub position: Option<String>,
    pub role: Role,
}

impl NewUser {
    /// Employees log in with their IIN; the initial password is its last six digits.
    pub fn from_employee(input: &CreateEmployee) -> AppResult<Self> {
        let fio = input.fio.trim();
        if fio.is_empty() {
            return Err(AppError::Validation("fio is required".into()));
        }
        let iin = input.iin.trim();
        if iin.len() != 12 || !iin.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation("iin must be exactly 12 digits".into()));
        }
        Ok(Self {
            username: iin.to_string(),
            password: iin[iin.len() - 6..].to_string(),
            fio: fio.to_string(),
            iin: Some(iin.to_string()),
            position: Some(input.position.trim().to_string()).filter(|p| !p.is_empty()),
            role: input.role,
        })
    }
}

fn read_employee(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get(0)?,
        username: row.get(1)?,
        fio: row.get(2)?,
        iin: row.get(3)?,
        position: row.get(4)?,
        role: column_enum(row, 5)?,
        created_at: row.get(6)?,
    })
}

const EMPLOYEE_COLUMNS: &str = "id, username, fio, iin, position, role, created_at";

pub fn insert_user(conn: &Connection, user: &NewUser, iterations: u32) -> AppResult<Employee> {
    let hash = hash_password(&user.password, iterations);
    let now = unix_now();
    conn.execute(
        "INSERT INTO users (username, password_hash, fio, iin, position, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.username,
            hash,
            user.fio,
            user.iin,
            user.position,
            user.role.as_str(),
            now
        ],
    )
    .map_err(|e| unique_violation(e, "a user with that username or IIN already exists"))?;

    Ok(Employee {
        id: conn.last_insert_rowid(),
        username: user.username.clone(),
        fio: user.fio.clone(),
        iin: user.iin.clone(),
        position: user.position.clone(),
        role: user.role,
        created_at: now,
    })
}

pub async fn create_user(pool: &Pool, user: NewUser, iterations: u32) -> AppResult<Employee> {
    interact(pool, move |conn| insert_user(conn, &user, iterations)).await
}

/// GET /v1/admin/employees
pub async fn list_employees(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<Vec<Employee>>> {
    user.ensure_admin()?;
    let employees = interact(&state.pool, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM users ORDER BY fio"
        ))?;
        let rows = stmt
            .query_map([], read_employee)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;
    Ok(Json(employees))
}

/// POST /v1/admin/employees
pub async fn create_employee(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<CreateEmployee>,
) -> AppResult<Json<Employee>> {
    user.ensure_admin()?;
    let new_user = NewUser::from_employee(&input)?;
    let employee = create_user(
        &state.pool,
        new_user,
        state.config.auth.password_iterations,
    )
    .await?;
    tracing::info!(employee_id = employee.id, role = %employee.role, "employee created");
    Ok(Json(employee))
}

/// DELETE /v1/admin/employees/{id}
pub async fn delete_employee(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    user.ensure_admin()?;
    if id == user.user_id {
        return Err(AppError::Validation("cannot delete your own account".into()));
    }

    interact(&state.pool, move |conn| {
        let batches: i64 = conn.query_row(
            "SELECT COUNT(*) FROM batches WHERE user_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if batches > 0 {
            return Err(AppError::Validation(format!(
                "employee owns {batches} batches and cannot be deleted"
            )));
        }
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(AppError::NotFound("employee not found".into()));
        }
        Ok(())
    })
    .await?;

    // Sessions cascade in the database; cached lookups must go too.
    state.sessions.invalidate_all();
    tracing::info!(employee_id = id, "employee deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::storage::migrations::run_migrations;

    fn input(iin: &str) -> CreateEmployee {
        CreateEmployee {
            fio: "Ахметов Серик".into(),
            iin: iin.into(),
            position: "Оператор".into(),
            role: Role::CuttingOperator,
        }
    }

    #[test]
    fn test_iin_becomes_credentials() {
        let user = NewUser::from_employee(&input("900101300123")).unwrap();
        assert_eq!(user.username, "900101300123");
        assert_eq!(user.password, "300123");
    }

    #[test]
    fn test_iin_must_be_twelve_digits() {
        assert!(NewUser::from_employee(&input("12345")).is_err());
        assert!(NewUser::from_employee(&input("90010130012a")).is_err());
    }

    #[test]
    fn test_duplicate_iin_is_validation_error() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let user = NewUser::from_employee(&input("900101300123")).unwrap();
        let created = insert_user(&conn, &user, 10_000).unwrap();

        let hash: String = conn
            .query_row("SELECT password_hash FROM users WHERE id = ?1", [created.id], |r| r.get(0))
            .unwrap();
        assert!(verify_password("300123", &hash));

        match insert_user(&conn, &user, 10_000) {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
