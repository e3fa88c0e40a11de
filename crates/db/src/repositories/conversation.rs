use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use ventix_core::domain::conversation::{ConversationMessage, MessageRole};
use ventix_core::domain::intent::IntentKind;
use ventix_core::domain::product::ProductId;

use super::product::parse_timestamp;
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn load_recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, content, intent, created_at
             FROM (
                SELECT id, role, content, intent, created_at
                FROM conversation_message
                WHERE user_id = ?
                ORDER BY id DESC
                LIMIT ?
             )
             ORDER BY id ASC",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn append(
        &self,
        user_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_message (user_id, role, content, intent, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.intent.map(IntentKind::as_str))
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_shown_products(&self, user_id: &str) -> Result<Vec<ProductId>, RepositoryError> {
        let row = sqlx::query("SELECT shown_products_json FROM conversation_state WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };
        let raw: String = row.try_get("shown_products_json")?;
        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid shown_products_json for `{user_id}`: {error}"))
        })?;
        Ok(ids.into_iter().map(ProductId).collect())
    }

    async fn save_shown_products(
        &self,
        user_id: &str,
        products: &[ProductId],
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let ids: Vec<&str> = products.iter().map(|id| id.0.as_str()).collect();
        let encoded = serde_json::to_string(&ids)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_state (user_id, shown_products_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                shown_products_json = excluded.shown_products_json,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(encoded)
        .bind(updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn message_from_row(row: SqliteRow) -> Result<ConversationMessage, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let intent = row
        .try_get::<Option<String>, _>("intent")?
        .map(|raw| {
            IntentKind::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{raw}`")))
        })
        .transpose()?;

    Ok(ConversationMessage {
        role,
        content: row.try_get("content")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
        intent,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use ventix_core::domain::conversation::ConversationMessage;
    use ventix_core::domain::intent::IntentKind;
    use ventix_core::domain::product::ProductId;

    use super::SqlConversationRepository;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn load_recent_keeps_chronological_tail() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        repo.append("549111", &ConversationMessage::user("hola", t0)).await.expect("append");
        repo.append(
            "549111",
            &ConversationMessage::assistant("Tenemos camisetas en azul", t0 + Duration::seconds(1))
                .with_intent(IntentKind::CheckStock),
        )
        .await
        .expect("append");
        repo.append("549111", &ConversationMessage::user("¿qué colores?", t0 + Duration::seconds(2)))
            .await
            .expect("append");
        repo.append("549222", &ConversationMessage::user("otro usuario", t0)).await.expect("append");

        let recent = repo.load_recent("549111", 2).await.expect("load recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "Tenemos camisetas en azul");
        assert_eq!(recent[0].intent, Some(IntentKind::CheckStock));
        assert_eq!(recent[1].content, "¿qué colores?");
        assert_eq!(recent[1].timestamp, t0 + Duration::seconds(2));
    }

    #[tokio::test]
    async fn shown_products_are_upserted() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let now = Utc::now();

        assert!(repo.load_shown_products("549111").await.expect("load empty").is_empty());

        repo.save_shown_products("549111", &[ProductId("A".to_string())], now)
            .await
            .expect("save");
        repo.save_shown_products(
            "549111",
            &[ProductId("B".to_string()), ProductId("C".to_string())],
            now,
        )
        .await
        .expect("overwrite");

        assert_eq!(
            repo.load_shown_products("549111").await.expect("load"),
            vec![ProductId("B".to_string()), ProductId("C".to_string())]
        );
    }
}
