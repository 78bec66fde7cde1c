use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, ArticleDbRow};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// 10 bound columns per row keeps a batch well under SQLite's 999 parameter limit
const BATCH_SIZE: usize = 50;

const ARTICLE_COLUMNS: &str =
    "url, title, description, url_to_image, published_at, source, is_favourite, is_headline_cache";

impl Database {
    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Insert an article or update the existing row with the same URL.
    ///
    /// Both flags are taken from `article`. The row keeps its original id, so
    /// insertion order survives updates; the favourite position is assigned
    /// the first time the flag goes up and cleared when it goes down.
    pub async fn upsert_article(&self, article: &Article) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO articles (url, title, description, url_to_image, published_at, source,
                                  is_favourite, is_headline_cache, favourite_order, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                    CASE WHEN ? THEN (SELECT COALESCE(MAX(favourite_order), 0) + 1 FROM articles) END,
                    ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                url_to_image = excluded.url_to_image,
                published_at = excluded.published_at,
                source = excluded.source,
                favourite_order = CASE
                    WHEN excluded.is_favourite = 0 THEN NULL
                    WHEN articles.is_favourite = 1 THEN articles.favourite_order
                    ELSE excluded.favourite_order
                END,
                cache_position = CASE
                    WHEN excluded.is_headline_cache = 1 THEN articles.cache_position
                END,
                is_favourite = excluded.is_favourite,
                is_headline_cache = excluded.is_headline_cache
        "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.url_to_image)
        .bind(&article.published_at)
        .bind(&article.source)
        .bind(article.is_favourite)
        .bind(article.is_headline_cache)
        .bind(article.is_favourite)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete an article by URL, returns whether a row was removed
    pub async fn delete_article(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the favourite flag (idempotent).
    ///
    /// Raising the flag upserts the article and leaves its headline-cache
    /// membership alone. Clearing it deletes the row when the article is not
    /// part of the headline cache either; otherwise only the flag drops.
    pub async fn set_favourite(&self, article: &Article, favourite: bool) -> Result<()> {
        if favourite {
            let now = chrono::Utc::now().timestamp();
            sqlx::query(
                r#"
                INSERT INTO articles (url, title, description, url_to_image, published_at, source,
                                      is_favourite, is_headline_cache, favourite_order, saved_at)
                VALUES (?, ?, ?, ?, ?, ?, 1, 0,
                        (SELECT COALESCE(MAX(favourite_order), 0) + 1 FROM articles), ?)
                ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    url_to_image = excluded.url_to_image,
                    published_at = excluded.published_at,
                    source = excluded.source,
                    favourite_order = CASE
                        WHEN articles.is_favourite = 1 THEN articles.favourite_order
                        ELSE excluded.favourite_order
                    END,
                    is_favourite = 1
            "#,
            )
            .bind(&article.url)
            .bind(&article.title)
            .bind(&article.description)
            .bind(&article.url_to_image)
            .bind(&article.published_at)
            .bind(&article.source)
            .bind(now)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE articles SET is_favourite = 0, favourite_order = NULL WHERE url = ?")
            .bind(&article.url)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM articles WHERE url = ? AND is_favourite = 0 AND is_headline_cache = 0",
        )
        .bind(&article.url)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get a single article by its URL
    pub async fn get_article(&self, url: &str) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Whether the URL is currently in the favourites subset
    pub async fn is_favourite(&self, url: &str) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_favourite FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|(favourite,)| favourite))
    }

    /// All favourite articles in the order they were favourited.
    ///
    /// Hard cap at MAX_ARTICLES to prevent unbounded memory allocation.
    pub async fn get_favourites(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE is_favourite = 1
             ORDER BY favourite_order, id
             LIMIT ?"
        ))
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// URLs of every favourite, for syncing flags on freshly fetched articles
    pub async fn favourite_urls(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM articles WHERE is_favourite = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// The cached headline set in arrival order
    pub async fn get_headline_cache(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE is_headline_cache = 1
             ORDER BY cache_position, id
             LIMIT ?"
        ))
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = rows.len(), "Loaded cached headlines");
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Headline Cache
    // ========================================================================

    /// Empty the headline cache, returns how many articles left it.
    ///
    /// Favourites that were also cached stay in the store with the cache
    /// flag cleared; everything else is deleted.
    pub async fn clear_headline_cache(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let cleared = clear_headline_cache_in(&mut *tx).await?;
        tx.commit().await?;
        Ok(cleared)
    }

    /// Add a page of headlines to the cache, returns the number stored.
    ///
    /// With `replace` the previous cache is cleared first (page 1); otherwise
    /// the page is appended after the current last position. New rows take
    /// their favourite flag from the article, existing rows keep theirs. A URL
    /// already in the cache keeps its first position.
    /// Runs in one transaction so a failed write leaves the old cache intact.
    pub async fn cache_headlines(&self, articles: &[Article], replace: bool) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        if replace {
            let cleared = clear_headline_cache_in(&mut *tx).await?;
            tracing::debug!(cleared = cleared, "Cleared previous headline cache");
        }

        if articles.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let next: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(cache_position), -1) + 1 FROM articles WHERE is_headline_cache = 1",
        )
        .fetch_one(&mut *tx)
        .await?;

        let now = chrono::Utc::now().timestamp();
        let mut position = next.0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (url, title, description, url_to_image, published_at, source, \
                 is_favourite, is_headline_cache, cache_position, saved_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(&article.description)
                    .push_bind(&article.url_to_image)
                    .push_bind(&article.published_at)
                    .push_bind(&article.source)
                    .push_bind(article.is_favourite)
                    .push_bind(true)
                    .push_bind(position)
                    .push_bind(now);
                position += 1;
            });

            builder.push(
                " ON CONFLICT(url) DO UPDATE SET \
                 title = excluded.title, \
                 description = excluded.description, \
                 url_to_image = excluded.url_to_image, \
                 published_at = excluded.published_at, \
                 source = excluded.source, \
                 cache_position = CASE \
                     WHEN articles.is_headline_cache = 1 THEN articles.cache_position \
                     ELSE excluded.cache_position \
                 END, \
                 is_headline_cache = 1",
            );

            builder.build().execute(&mut *tx).await?;
        }

        // Favourite positions for rows that arrived already flagged
        sqlx::query(
            r#"
            UPDATE articles
            SET favourite_order = (SELECT COALESCE(MAX(favourite_order), 0) FROM articles) + id
            WHERE is_favourite = 1 AND favourite_order IS NULL
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(articles.len())
    }
}

async fn clear_headline_cache_in(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let deleted =
        sqlx::query("DELETE FROM articles WHERE is_headline_cache = 1 AND is_favourite = 0")
            .execute(&mut *conn)
            .await?;
    let unflagged = sqlx::query(
        "UPDATE articles SET is_headline_cache = 0, cache_position = NULL WHERE is_headline_cache = 1",
    )
    .execute(&mut *conn)
    .await?;
    Ok(deleted.rows_affected() + unflagged.rows_affected())
}
