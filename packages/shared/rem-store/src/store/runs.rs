use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::Result;
use crate::models::{DreamRun, DreamRunState, Tenant};
use crate::store::RemStore;

impl RemStore {
    /// Persist a run and every later state transition. Keyed by run id, so
    /// callers just save the same struct as it moves through its states.
    pub async fn save_dream_run(&self, run: &DreamRun) -> Result<()> {
        Self::ensure_tenant(&run.tenant_id)?;
        sqlx::query(
            r#"
            INSERT INTO dream_runs
              (id, tenant_id, job, state, started_at, finished_at, created_at,
               moments_created, edges_created, retries, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
              state = EXCLUDED.state,
              started_at = EXCLUDED.started_at,
              finished_at = EXCLUDED.finished_at,
              moments_created = EXCLUDED.moments_created,
              edges_created = EXCLUDED.edges_created,
              retries = EXCLUDED.retries,
              last_error = EXCLUDED.last_error
            "#,
        )
        .bind(run.id)
        .bind(&run.tenant_id)
        .bind(&run.job)
        .bind(run.state.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.created_at)
        .bind(run.moments_created)
        .bind(run.edges_created)
        .bind(run.retries)
        .bind(&run.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent run of a job for a tenant; the scheduler's resume point.
    pub async fn latest_dream_run(&self, tenant_id: &str, job: &str) -> Result<Option<DreamRun>> {
        Self::ensure_tenant(tenant_id)?;
        let row = sqlx::query(
            r#"
            SELECT * FROM dream_runs
            WHERE tenant_id = $1 AND job = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dream_run_from_row).transpose()
    }

    /// The tenant registry itself is the one admin-scoped read in the
    /// system: the dreaming scheduler iterates it to find work.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Tenant {
                    tenant_id: row.try_get("tenant_id")?,
                    email: row.try_get("email")?,
                    public_key: row.try_get("public_key")?,
                    metadata: serde_json::from_value(
                        row.try_get::<serde_json::Value, _>("metadata")?,
                    )?,
                })
            })
            .collect()
    }
}

fn dream_run_from_row(row: &PgRow) -> Result<DreamRun> {
    Ok(DreamRun {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        job: row.try_get("job")?,
        state: DreamRunState::parse(&row.try_get::<String, _>("state")?),
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        created_at: row.try_get("created_at")?,
        moments_created: row.try_get("moments_created")?,
        edges_created: row.try_get("edges_created")?,
        retries: row.try_get("retries")?,
        last_error: row.try_get("last_error")?,
    })
}
