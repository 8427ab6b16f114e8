use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use rust_decimal::Decimal;
use storefront_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_admin(&pool, "admin@example.com", "admin123!").await?;
    let user_id = ensure_user(&pool, "user@example.com", "user1234").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_admin(pool: &sqlx::PgPool, email: &str, password: &str) -> anyhow::Result<Uuid> {
    ensure_user_with_role(pool, email, password, "admin").await
}

async fn ensure_user(pool: &sqlx::PgPool, email: &str, password: &str) -> anyhow::Result<Uuid> {
    ensure_user_with_role(pool, email, password, "user").await
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    struct Seed {
        name: &'static str,
        description: &'static str,
        price: &'static str,
        selling_method: &'static str,
        weight: Option<&'static str>,
        weight_unit: Option<&'static str>,
        stock: i32,
    }

    let products = vec![
        Seed {
            name: "Medjool Dates 1kg Box",
            description: "Soft premium dates, boxed",
            price: "35.00",
            selling_method: "unit",
            weight: None,
            weight_unit: None,
            stock: 120,
        },
        Seed {
            name: "Lamb Shoulder",
            description: "Fresh lamb, cut to order",
            price: "79.90",
            selling_method: "weight_custom",
            weight: None,
            weight_unit: Some("kg"),
            stock: 40,
        },
        Seed {
            name: "Aged Cheese Wheel A17",
            description: "Pre-measured wheel, sold as-is",
            price: "95.40",
            selling_method: "weight_fixed",
            weight: Some("1.2"),
            weight_unit: Some("kg"),
            stock: 1,
        },
        Seed {
            name: "Olive Oil 750ml",
            description: "Cold pressed, first harvest",
            price: "48.50",
            selling_method: "unit",
            weight: None,
            weight_unit: None,
            stock: 80,
        },
    ];

    for seed in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, selling_method, weight, weight_unit, stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(seed.name)
        .bind(seed.description)
        .bind(seed.price.parse::<Decimal>()?)
        .bind(seed.selling_method)
        .bind(seed.weight.map(|w| w.parse::<Decimal>()).transpose()?)
        .bind(seed.weight_unit)
        .bind(seed.stock)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
