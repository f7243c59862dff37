use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::model::{Article, MaterialDraft};

/// Destination for finished materials. Called exactly once per accepted item.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Stores the draft and returns the new artifact id.
    async fn store(&self, draft: &MaterialDraft, article: &Article) -> Result<String>;
}

/// Keeps rendered markdown materials in the `materials` table.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the table and its indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS materials (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                title TEXT NOT NULL,
                markdown TEXT NOT NULL,
                source_link TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create materials table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_materials_date ON materials(date)")
            .execute(&self.pool)
            .await
            .context("failed to create materials date index")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_materials_title ON materials(title)")
            .execute(&self.pool)
            .await
            .context("failed to create materials title index")?;

        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn store(&self, draft: &MaterialDraft, article: &Article) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let markdown = render_markdown(draft, article);

        sqlx::query(
            "INSERT INTO materials (id, date, title, markdown, source_link) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&date)
        .bind(&draft.title)
        .bind(&markdown)
        .bind(&article.link)
        .execute(&self.pool)
        .await
        .context("failed to insert material")?;

        debug!(material_id = %id, "material row inserted");
        Ok(id)
    }
}

/// Markdown document for one material.
pub fn render_markdown(draft: &MaterialDraft, article: &Article) -> String {
    let mut md = format!(
        "## {}\n\n### Summary\n{}\n\n### Themes\n{}\n\n### Examples\n",
        draft.title, draft.summary, draft.themes
    );
    for (i, text) in draft.candidate_texts.iter().enumerate() {
        md.push_str(&format!("Example {}\n{}\n\n", i + 1, text));
    }

    let updated = article
        .published_at
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    md.push_str(&format!(
        "> Updated: {}\n>\n> Source: {} ({})",
        updated, article.source_name, article.link
    ));
    md
}
