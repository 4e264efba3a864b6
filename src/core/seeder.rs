use sqlx::SqlitePool;

use crate::reference::ReferenceStore;

/// Upserts the reference tables so stored points always have a parent row.
pub async fn seed_reference(pool: &SqlitePool, reference: &dyn ReferenceStore) -> Result<(), anyhow::Error> {
    let bas = reference.balancing_authorities();
    let fuels = reference.fuels();
    tracing::info!(bas = bas.len(), fuels = fuels.len(), "seeding reference tables");

    let mut tx = pool.begin().await?;

    for ba in bas {
        sqlx::query(
            "INSERT INTO balancing_authorities (abbrev, name, timezone)
             VALUES ($1, $2, $3)
             ON CONFLICT (abbrev) DO UPDATE
             SET name = EXCLUDED.name,
                 timezone = EXCLUDED.timezone",
        )
        .bind(ba.abbrev)
        .bind(ba.name)
        .bind(ba.timezone.name())
        .execute(&mut *tx)
        .await?;
    }

    for fuel in fuels {
        sqlx::query(
            "INSERT INTO fuel_types (name, description, is_renewable)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE
             SET description = EXCLUDED.description,
                 is_renewable = EXCLUDED.is_renewable",
        )
        .bind(fuel.name)
        .bind(fuel.description)
        .bind(fuel.is_renewable)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
