use crate::analytics::consumption::EntryMaterial;
use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::error::{unique_violation, AppError, AppResult, LoggedJson};
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{column_enum, BatchType, EquipmentStatus};
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Equipment {
    pub id: i64,
    pub name: String,
    pub equipment_type: BatchType,
    pub status: EquipmentStatus,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Material {
    pub id: i64,
    pub name: String,
    pub unit: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EquipmentQuery {
    pub equipment_type: Option<BatchType>,
    pub status: Option<EquipmentStatus>,
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SeedReport {
    pub materials: usize,
    pub equipment: usize,
    pub products: usize,
}

const EXTRA_MATERIALS: &[(&str, &str)] = &[("Песок", "kg"), ("Зола", "kg")];

const EQUIPMENT: &[(&str, BatchType)] = &[
    ("Форма заливки №1", BatchType::Casting),
    ("Форма заливки №2", BatchType::Casting),
    ("Форма заливки №3", BatchType::Casting),
    ("Станок резки №1", BatchType::Cutting),
    ("Станок резки №2", BatchType::Cutting),
    ("Автоклав №1", BatchType::Autoclave),
    ("Автоклав №2", BatchType::Autoclave),
    ("Автоклав №3", BatchType::Autoclave),
];

const PRODUCTS: &[(&str, &str, &str)] = &[
    ("GB-D400-200", "Блок газобетонный D400", "Газобетонный блок плотностью D400, размер 200мм"),
    ("GB-D500-200", "Блок газобетонный D500", "Газобетонный блок плотностью D500, размер 200мм"),
    ("GB-D600-200", "Блок газобетонный D600", "Газобетонный блок плотностью D600, размер 200мм"),
    ("GB-D400-300", "Блок газобетонный D400-300", "Газобетонный блок плотностью D400, размер 300мм"),
    ("GB-D500-300", "Блок газобетонный D500-300", "Газобетонный блок плотностью D500, размер 300мм"),
    ("GB-LINTEL", "Перемычка газобетонная", "Перемычка из газобетона"),
    ("GB-U-BLOCK", "U-блок газобетонный", "U-образный блок для армопоясов"),
];

/// Insert the standard materials, equipment and products. Existing rows
/// (matched by name or code) are left alone; returns how many were added.
pub fn seed_reference_data(conn: &mut Connection) -> rusqlite::Result<SeedReport> {
    let tx = conn.transaction()?;
    let mut report = SeedReport::default();
    let now = unix_now();

    let materials = EntryMaterial::ALL
        .iter()
        .map(|m| (m.catalog_name(), m.unit()))
        .chain(EXTRA_MATERIALS.iter().copied());
    for (name, unit) in materials {
        report.materials += tx.execute(
            "INSERT OR IGNORE INTO materials (name, unit) VALUES (?1, ?2)",
            params![name, unit],
        )?;
    }
    for (name, equipment_type) in EQUIPMENT {
        report.equipment += tx.execute(
            "INSERT OR IGNORE INTO equipment (name, equipment_type, created_at) VALUES (?1, ?2, ?3)",
            params![name, equipment_type.as_str(), now],
        )?;
    }
    for (code, name, description) in PRODUCTS {
        report.products += tx.execute(
            "INSERT OR IGNORE INTO products (code, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![code, name, description, now],
        )?;
    }

    tx.commit()?;
    Ok(report)
}

/// GET /v1/products
pub async fn list_products(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Product>>> {
    let products = interact(&state.pool, |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, code, description, is_active, created_at
             FROM products WHERE is_active = 1 ORDER BY code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Product {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    code: row.get(2)?,
                    description: row.get(3)?,
                    is_active: row.get::<_, i64>(4)? != 0,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;
    Ok(Json(products))
}

/// POST /v1/products
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<CreateProduct>,
) -> AppResult<Json<Product>> {
    user.ensure_admin()?;
    let name = input.name.trim().to_string();
    let code = input.code.trim().to_string();
    if name.is_empty() || code.is_empty() {
        return Err(AppError::Validation("name and code are required".into()));
    }
    let description = input.description.filter(|d| !d.trim().is_empty());
    let now = unix_now();

    let product = interact(&state.pool, move |conn| {
        conn.execute(
            "INSERT INTO products (name, code, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, code, description, now],
        )
        .map_err(|e| unique_violation(e, "a product with that code already exists"))?;
        Ok(Product {
            id: conn.last_insert_rowid(),
            name,
            code,
            description,
            is_active: true,
            created_at: now,
        })
    })
    .await?;

    tracing::info!(product_id = product.id, code = %product.code, "product created");
    Ok(Json(product))
}

/// DELETE /v1/products/{id} - soft delete; batches keep their product.
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    user.ensure_admin()?;
    let updated = interact(&state.pool, move |conn| {
        Ok(conn.execute("UPDATE products SET is_active = 0 WHERE id = ?1", [id])?)
    })
    .await?;
    if updated == 0 {
        return Err(AppError::NotFound("product not found".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// GET /v1/equipment
pub async fn list_equipment(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EquipmentQuery>,
) -> AppResult<Json<Vec<Equipment>>> {
    let equipment = interact(&state.pool, move |conn| {
        load_equipment(conn, query.equipment_type, query.status).map_err(Into::into)
    })
    .await?;
    Ok(Json(equipment))
}

pub fn load_equipment(
    conn: &Connection,
    equipment_type: Option<BatchType>,
    status: Option<EquipmentStatus>,
) -> rusqlite::Result<Vec<Equipment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, equipment_type, status, description FROM equipment
         WHERE (?1 IS NULL OR equipment_type = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY name",
    )?;
    let rows = stmt.query_map(
        params![
            equipment_type.map(|t| t.as_str()),
            status.map(|s| s.as_str())
        ],
        |row| {
            Ok(Equipment {
                id: row.get(0)?,
                name: row.get(1)?,
                equipment_type: column_enum(row, 2)?,
                status: column_enum(row, 3)?,
                description: row.get(4)?,
            })
        },
    )?;
    rows.collect()
}

/// GET /v1/materials
pub async fn list_materials(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Material>>> {
    let materials = interact(&state.pool, |conn| {
        let mut stmt =
            conn.prepare("SELECT id, name, unit FROM materials WHERE is_active = 1 ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Material {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    unit: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;
    Ok(Json(materials))
}

/// POST /v1/admin/init-references
pub async fn init_references(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<SeedReport>> {
    user.ensure_admin()?;
    let report = interact(&state.pool, |conn| Ok(seed_reference_data(conn)?)).await?;
    tracing::info!(
        materials = report.materials,
        equipment = report.equipment,
        products = report.products,
        "reference data seeded"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    #[test]
    fn test_seed_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let first = seed_reference_data(&mut conn).unwrap();
        assert_eq!(
            first,
            SeedReport {
                materials: 9,
                equipment: 8,
                products: 7
            }
        );
        let second = seed_reference_data(&mut conn).unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[test]
    fn test_equipment_filter() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        seed_reference_data(&mut conn).unwrap();

        let autoclaves = load_equipment(&conn, Some(BatchType::Autoclave), None).unwrap();
        assert_eq!(autoclaves.len(), 3);
        let broken = load_equipment(&conn, None, Some(EquipmentStatus::Broken)).unwrap();
        assert!(broken.is_empty());
    }
}
