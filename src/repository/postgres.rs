use super::ProductRepository;
use crate::models::{NewProduct, Product, ProductFilter};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

// `price` is stored as NUMERIC(12,2) and read back through a cast so the
// record keeps its `f64` field.
const PRODUCT_COLUMNS: &str = "id, owner_id, name, description, source_images, \
     compressed_images, price::DOUBLE PRECISION AS price, created_at";

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to Postgres");
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the products table if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id BIGSERIAL PRIMARY KEY,
                owner_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                source_images TEXT[] NOT NULL DEFAULT '{}',
                compressed_images TEXT[] NOT NULL DEFAULT '{}',
                price NUMERIC(12, 2) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tables created before prices were exact still hold DOUBLE PRECISION.
        sqlx::query("ALTER TABLE products ALTER COLUMN price TYPE NUMERIC(12, 2)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS products_owner_id_idx ON products (owner_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Products schema is up to date");
        Ok(())
    }

    async fn exists(&self, product_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn get(&self, product_id: i64) -> Result<Product> {
        let query = format!("SELECT {} FROM products WHERE id = $1", PRODUCT_COLUMNS);
        sqlx::query_as::<_, Product>(&query)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound(product_id))
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        let compressed = vec![String::new(); product.source_images.len()];
        let query = format!(
            r#"
            INSERT INTO products
                (owner_id, name, description, source_images, compressed_images, price)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC(12, 2))
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );

        let created = sqlx::query_as::<_, Product>(&query)
            .bind(product.owner_id)
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.source_images)
            .bind(&compressed)
            .bind(product.price)
            .fetch_one(&self.pool)
            .await?;

        tracing::debug!(
            product_id = created.id,
            images = created.source_images.len(),
            "Created product"
        );
        Ok(created)
    }

    async fn list(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        let query = format!(
            r#"
            SELECT {}
            FROM products
            WHERE ($1::BIGINT IS NULL OR owner_id = $1)
              AND ($2::NUMERIC IS NULL OR price >= $2::NUMERIC)
              AND ($3::NUMERIC IS NULL OR price <= $3::NUMERIC)
            ORDER BY id
            "#,
            PRODUCT_COLUMNS
        );

        Ok(sqlx::query_as::<_, Product>(&query)
            .bind(filter.owner_id)
            .bind(filter.min_price)
            .bind(filter.max_price)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn set_compressed_image(
        &self,
        product_id: i64,
        image_url: &str,
        compressed_url: &str,
    ) -> Result<()> {
        // Single statement: the row lock serializes concurrent slot writes and
        // the array is rebuilt from the row version that holds the lock.
        let result = sqlx::query(
            r#"
            UPDATE products p
            SET compressed_images = ARRAY(
                SELECT CASE
                    WHEN s.source = $2 THEN $3
                    ELSE COALESCE(p.compressed_images[s.idx::INT], '')
                END
                FROM unnest(p.source_images) WITH ORDINALITY AS s(source, idx)
                ORDER BY s.idx
            )
            WHERE p.id = $1 AND $2 = ANY(p.source_images)
            "#,
        )
        .bind(product_id)
        .bind(image_url)
        .bind(compressed_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        if self.exists(product_id).await? {
            Err(Error::SlotNotFound {
                product_id,
                image_url: image_url.to_string(),
            })
        } else {
            Err(Error::NotFound(product_id))
        }
    }
}
