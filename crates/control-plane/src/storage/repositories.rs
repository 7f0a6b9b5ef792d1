// PostgreSQL repository for the provider catalog

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;

const PROVIDER_COLUMNS: &str = "id, name, display_name, kind, base_url, api_key_ciphertext, \
     api_key_iv, api_key_tag, api_key_hint, enabled, created_at, updated_at";

const MODEL_COLUMNS: &str =
    "id, provider_id, model_id, display_name, enabled, is_default, metadata, created_at, updated_at";

const MODEL_WITH_PROVIDER_SELECT: &str = r#"
    SELECT m.id, m.provider_id, m.model_id, m.display_name, m.enabled, m.is_default, m.metadata,
           m.created_at, m.updated_at,
           p.name AS provider_name, p.display_name AS provider_display_name,
           p.kind AS provider_kind, p.enabled AS provider_enabled
    FROM llm_models m
    JOIN llm_providers p ON m.provider_id = p.id
"#;

const MODEL_ORDER: &str = "ORDER BY m.is_default DESC, p.name ASC, m.display_name ASC";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // LLM Providers
    // ============================================

    pub async fn create_llm_provider(&self, input: CreateLlmProviderRow) -> Result<LlmProviderRow> {
        let (ciphertext, iv, tag, hint) = match input.credential {
            Some(c) => (
                Some(c.secret.ciphertext),
                Some(c.secret.iv),
                Some(c.secret.auth_tag),
                Some(c.hint),
            ),
            None => (None, None, None, None),
        };

        let row = sqlx::query_as::<_, LlmProviderRow>(&format!(
            r#"
            INSERT INTO llm_providers (id, name, display_name, kind, base_url,
                api_key_ciphertext, api_key_iv, api_key_tag, api_key_hint, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PROVIDER_COLUMNS
        ))
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.display_name)
        .bind(&input.kind)
        .bind(&input.base_url)
        .bind(ciphertext)
        .bind(iv)
        .bind(tag)
        .bind(hint)
        .bind(input.enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_llm_provider(&self, id: Uuid) -> Result<Option<LlmProviderRow>> {
        let row = sqlx::query_as::<_, LlmProviderRow>(&format!(
            "SELECT {} FROM llm_providers WHERE id = $1",
            PROVIDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_llm_provider_by_name(&self, name: &str) -> Result<Option<LlmProviderRow>> {
        let row = sqlx::query_as::<_, LlmProviderRow>(&format!(
            "SELECT {} FROM llm_providers WHERE name = $1",
            PROVIDER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_llm_providers(&self) -> Result<Vec<LlmProviderRow>> {
        let rows = sqlx::query_as::<_, LlmProviderRow>(&format!(
            "SELECT {} FROM llm_providers ORDER BY name ASC",
            PROVIDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_llm_provider(
        &self,
        id: Uuid,
        input: UpdateLlmProviderRow,
    ) -> Result<Option<LlmProviderRow>> {
        // $6: 0 keep, 1 set, 2 clear
        let (credential_op, ciphertext, iv, tag, hint) = match input.credential {
            CredentialUpdate::Keep => (0i16, None, None, None, None),
            CredentialUpdate::Set(c) => (
                1,
                Some(c.secret.ciphertext),
                Some(c.secret.iv),
                Some(c.secret.auth_tag),
                Some(c.hint),
            ),
            CredentialUpdate::Clear => (2, None, None, None, None),
        };
        let (set_base_url, base_url) = match input.base_url {
            Some(url) => (true, url),
            None => (false, None),
        };

        let row = sqlx::query_as::<_, LlmProviderRow>(&format!(
            r#"
            UPDATE llm_providers
            SET
                display_name = COALESCE($2, display_name),
                kind = COALESCE($3, kind),
                base_url = CASE WHEN $4 THEN $5 ELSE base_url END,
                enabled = COALESCE($11, enabled),
                api_key_ciphertext = CASE $6 WHEN 0 THEN api_key_ciphertext ELSE $7 END,
                api_key_iv = CASE $6 WHEN 0 THEN api_key_iv ELSE $8 END,
                api_key_tag = CASE $6 WHEN 0 THEN api_key_tag ELSE $9 END,
                api_key_hint = CASE $6 WHEN 0 THEN api_key_hint ELSE $10 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROVIDER_COLUMNS
        ))
        .bind(id)
        .bind(&input.display_name)
        .bind(&input.kind)
        .bind(set_base_url)
        .bind(base_url)
        .bind(credential_op)
        .bind(ciphertext)
        .bind(iv)
        .bind(tag)
        .bind(hint)
        .bind(input.enabled)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Models are removed by ON DELETE CASCADE
    pub async fn delete_llm_provider(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM llm_providers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // LLM Models
    // ============================================

    /// Models that may be shown and dispatched: model and provider enabled
    pub async fn list_enabled_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        let rows = sqlx::query_as::<_, LlmModelWithProviderRow>(&format!(
            "{} WHERE m.enabled AND p.enabled {}",
            MODEL_WITH_PROVIDER_SELECT, MODEL_ORDER
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_all_llm_models(&self) -> Result<Vec<LlmModelWithProviderRow>> {
        let rows = sqlx::query_as::<_, LlmModelWithProviderRow>(&format!(
            "{} {}",
            MODEL_WITH_PROVIDER_SELECT, MODEL_ORDER
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_llm_models_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<LlmModelRow>> {
        let rows = sqlx::query_as::<_, LlmModelRow>(&format!(
            "SELECT {} FROM llm_models WHERE provider_id = $1 ORDER BY display_name ASC",
            MODEL_COLUMNS
        ))
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_llm_model_with_provider(
        &self,
        id: Uuid,
    ) -> Result<Option<LlmModelWithProviderRow>> {
        let row = sqlx::query_as::<_, LlmModelWithProviderRow>(&format!(
            "{} WHERE m.id = $1",
            MODEL_WITH_PROVIDER_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Model plus provider credentials, only if both are enabled
    pub async fn get_invocable_model(&self, id: Uuid) -> Result<Option<InvocableModelRow>> {
        let row = sqlx::query_as::<_, InvocableModelRow>(
            r#"
            SELECT m.id, m.model_id, m.metadata,
                   p.id AS provider_id, p.name AS provider_name, p.kind AS provider_kind,
                   p.base_url AS provider_base_url,
                   p.api_key_ciphertext, p.api_key_iv, p.api_key_tag
            FROM llm_models m
            JOIN llm_providers p ON m.provider_id = p.id
            WHERE m.id = $1 AND m.enabled AND p.enabled
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Replace all models of a provider in one transaction
    ///
    /// The provider's previous default stays default when its native id is
    /// among the new models.
    pub async fn replace_llm_models_for_provider(
        &self,
        provider_id: Uuid,
        models: Vec<NewLlmModelRow>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let previous_default: Option<String> = sqlx::query_scalar(
            "SELECT model_id FROM llm_models WHERE provider_id = $1 AND is_default",
        )
        .bind(provider_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM llm_models WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;

        for model in &models {
            let is_default = previous_default.as_deref() == Some(model.model_id.as_str());
            sqlx::query(
                r#"
                INSERT INTO llm_models (id, provider_id, model_id, display_name, enabled, is_default, metadata)
                VALUES ($1, $2, $3, $4, TRUE, $5, $6)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(provider_id)
            .bind(&model.model_id)
            .bind(&model.display_name)
            .bind(is_default)
            .bind(serde_json::to_value(&model.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(models.len())
    }

    /// Clear the current default and set a new one in one transaction.
    /// Returns false (and changes nothing) for an unknown id.
    pub async fn set_default_llm_model(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM llm_models WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("UPDATE llm_models SET is_default = FALSE, updated_at = NOW() WHERE is_default")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE llm_models SET is_default = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn update_llm_model(
        &self,
        id: Uuid,
        input: UpdateLlmModelRow,
    ) -> Result<Option<LlmModelRow>> {
        let clear_default = input.is_default == Some(false);

        let row = sqlx::query_as::<_, LlmModelRow>(&format!(
            r#"
            UPDATE llm_models
            SET
                display_name = COALESCE($2, display_name),
                enabled = COALESCE($3, enabled),
                is_default = CASE WHEN $4 THEN FALSE ELSE is_default END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MODEL_COLUMNS
        ))
        .bind(id)
        .bind(&input.display_name)
        .bind(input.enabled)
        .bind(clear_default)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_llm_model(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM llm_models WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
