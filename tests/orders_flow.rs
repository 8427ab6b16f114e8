use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, Statement};
use uuid::Uuid;

use storefront_api::{
    cart::Shopper,
    config::{AppConfig, PaymentConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::{AddToCartRequest, MergeCartRequest},
        checkout::CheckoutRequest,
        orders::OrderLookupRequest,
        payments::RequestPaymentRequest,
    },
    entity::{
        orders::{Column as OrderCol, Entity as Orders},
        products::ActiveModel as ProductActive,
        users::ActiveModel as UserActive,
    },
    middleware::auth::{AuthUser, ShopperIdentity},
    models::DeliveryMethod,
    payment::PaymentStatus,
    routes::admin::UpdateOrderStatusRequest,
    services::{admin_service, cart_service, checkout_service, order_service, payment_service},
    state::AppState,
    status::OrderStatus,
};

// The tests share one database; hold this across each run so truncation
// in one test cannot race another.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

// Integration flow: cart -> staged checkout -> mock payment settles ->
// order materializes exactly once -> admin drives the status machine ->
// guest lookup verifies ownership.
#[tokio::test]
async fn staged_checkout_payment_and_admin_flow() -> anyhow::Result<()> {
    let _db = DB_LOCK.lock().await;
    // Allow skipping when no DB is configured in the environment.
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let state = setup_state(&database_url).await?;

    // Seed users
    let user_id = create_user(&state, "user", "user@example.com").await?;
    let admin_id = create_user(&state, "admin", "admin@example.com").await?;

    // Seed a unit-priced product
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Medjool Dates 1kg Box".into()),
        description: Set(Some("A product for testing".into())),
        price: Set(Decimal::from(100)),
        image: Set(None),
        selling_method: Set("unit".into()),
        weight: Set(None),
        weight_unit: Set(None),
        stock: Set(10),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let identity = ShopperIdentity {
        shopper: Shopper::User(user_id),
        user: Some(auth_user.clone()),
    };

    // Add to cart
    let cart_resp = cart_service::add_to_cart(
        &state,
        &identity,
        AddToCartRequest {
            product_id: product.id,
            quantity: Some(2),
            weight: None,
        },
    )
    .await?;
    assert_eq!(cart_resp.data.unwrap().total_price, Decimal::from(200));

    // Stage the checkout; pickup keeps the delivery fee at zero.
    let staged = checkout_service::stage_order(
        &state,
        &identity,
        CheckoutRequest {
            delivery_method: DeliveryMethod::Pickup,
            phone_number: "+966 55 123 4567".into(),
            full_name: "Test Buyer".into(),
            city: "Riyadh".into(),
            street: None,
            coordinates: None,
            pickup_location: Some("Main branch".into()),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(staged.quote.subtotal, Decimal::from(200));
    assert_eq!(staged.quote.service_fee, Decimal::from(6));
    assert_eq!(staged.quote.delivery_fee, Decimal::ZERO);
    assert_eq!(staged.quote.total, Decimal::from(206));

    // Request a payment code; without processor credentials this becomes
    // a mock transaction.
    let code = payment_service::request_payment_code(
        &state,
        RequestPaymentRequest {
            staging_token: staged.staging_token.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert!(code.is_mock);

    // A refresh re-uses the pending transaction instead of minting a
    // second code.
    let again = payment_service::request_payment_code(
        &state,
        RequestPaymentRequest {
            staging_token: staged.staging_token.clone(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(again.transaction_id, code.transaction_id);

    // Poll until the mock settles.
    let mut status = PaymentStatus::Pending;
    for _ in 0..5 {
        status = payment_service::get_payment_status(&state, &code.transaction_id)
            .await?
            .data
            .unwrap()
            .status;
        if status == PaymentStatus::Paid {
            break;
        }
    }
    assert_eq!(status, PaymentStatus::Paid);

    // Materialize; calling twice yields the same single order.
    let confirmed = order_service::materialize_order(&state, &staged.staging_token)
        .await?
        .data
        .unwrap();
    let replay = order_service::materialize_order(&state, &staged.staging_token)
        .await?
        .data
        .unwrap();
    assert_eq!(confirmed.order_id, replay.order_id);

    let materialized = Orders::find()
        .filter(OrderCol::StagingToken.eq(staged.staging_token.clone()))
        .all(&state.orm)
        .await?;
    assert_eq!(materialized.len(), 1, "exactly one order per staged checkout");
    let order_row = &materialized[0];
    assert_eq!(order_row.total_price, Decimal::from(206));
    assert_eq!(order_row.status, "paid");
    assert!(order_row.is_paid);
    assert!(order_row.paid_at.is_some());

    let detailed = order_service::get_order(&state, &auth_user, confirmed.order_id)
        .await?
        .data
        .unwrap();
    assert_eq!(detailed.items.len(), 1);
    assert_eq!(detailed.items[0].price, Decimal::from(100));
    assert_eq!(detailed.items[0].quantity, Some(2));

    // The source cart was cleared by materialization.
    let cart_after = cart_service::get_cart(&state, &identity).await?.data.unwrap();
    assert!(cart_after.items.is_empty());

    // Admin walks the lifecycle: paid -> shipped -> delivered.
    let shipped = admin_service::update_order_status(
        &state,
        &auth_admin,
        confirmed.order_id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(shipped.success);
    assert_eq!(shipped.order.unwrap().status, OrderStatus::Shipped);

    let delivered = admin_service::update_order_status(
        &state,
        &auth_admin,
        confirmed.order_id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(delivered.success);
    let delivered_order = delivered.order.unwrap();
    assert!(delivered_order.is_delivered);
    assert!(delivered_order.delivered_at.is_some());

    // Unpaying a delivered order is rejected, as a structured verdict
    // rather than an HTTP failure.
    let rejected = admin_service::update_order_status(
        &state,
        &auth_admin,
        confirmed.order_id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Pending,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(!rejected.success);
    assert!(rejected.message.contains("delivered"));

    // Guest lookup: reference prefix plus differently formatted phone.
    let prefix: String = order_row.reference.chars().take(16).collect();
    let lookup = order_service::lookup_guest_order(
        &state,
        OrderLookupRequest {
            order_ref: prefix,
            phone_number: "0551234567".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert!(lookup.verified);
    assert_eq!(lookup.order_id, confirmed.order_id);

    // Wrong phone gets the same generic not-found as a wrong reference.
    let miss = order_service::lookup_guest_order(
        &state,
        OrderLookupRequest {
            order_ref: order_row.reference.clone(),
            phone_number: "0559999999".into(),
        },
    )
    .await;
    assert!(miss.is_err());

    Ok(())
}

// A guest shops against the session store, pays, and the confirmation
// instructs the client to clear its local copy.
#[tokio::test]
async fn guest_checkout_flow_with_delivery_fee() -> anyhow::Result<()> {
    let _db = DB_LOCK.lock().await;
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let state = setup_state(&database_url).await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Olive Oil 750ml".into()),
        description: Set(None),
        price: Set(Decimal::from(100)),
        image: Set(None),
        selling_method: Set("unit".into()),
        weight: Set(None),
        weight_unit: Set(None),
        stock: Set(10),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let guest = ShopperIdentity {
        shopper: Shopper::Guest("guest-session-1".into()),
        user: None,
    };

    cart_service::add_to_cart(
        &state,
        &guest,
        AddToCartRequest {
            product_id: product.id,
            quantity: Some(1),
            weight: None,
        },
    )
    .await?;

    // Delivery under the free threshold: 100 + 3 + 15.
    let staged = checkout_service::stage_order(
        &state,
        &guest,
        CheckoutRequest {
            delivery_method: DeliveryMethod::Delivery,
            phone_number: "0501112222".into(),
            full_name: "Guest Buyer".into(),
            city: "Jeddah".into(),
            street: Some("Corniche Rd".into()),
            coordinates: None,
            pickup_location: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(staged.quote.service_fee, Decimal::from(3));
    assert_eq!(staged.quote.delivery_fee, Decimal::from(15));
    assert_eq!(staged.quote.total, Decimal::from(118));

    let code = payment_service::request_payment_code(
        &state,
        RequestPaymentRequest {
            staging_token: staged.staging_token.clone(),
        },
    )
    .await?
    .data
    .unwrap();

    let mut status = PaymentStatus::Pending;
    for _ in 0..5 {
        status = payment_service::get_payment_status(&state, &code.transaction_id)
            .await?
            .data
            .unwrap()
            .status;
        if status == PaymentStatus::Paid {
            break;
        }
    }
    assert_eq!(status, PaymentStatus::Paid);

    let confirmed = order_service::materialize_order(&state, &staged.staging_token)
        .await?
        .data
        .unwrap();
    assert!(confirmed.clear_local_cart);

    let order = Orders::find()
        .filter(OrderCol::StagingToken.eq(staged.staging_token.clone()))
        .one(&state.orm)
        .await?
        .expect("guest order materialized");
    assert!(order.user_id.is_none(), "guest orders are keyed by phone");
    assert_eq!(order.total_price, Decimal::from(118));

    // The session cart is gone server-side as well.
    let cart_after = cart_service::get_cart(&state, &guest).await?.data.unwrap();
    assert!(cart_after.items.is_empty());

    Ok(())
}

// Login merge: the guest cart replaces the persisted cart wholesale and
// the session copy is dropped.
#[tokio::test]
async fn guest_cart_merges_into_user_cart_on_login() -> anyhow::Result<()> {
    let _db = DB_LOCK.lock().await;
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let state = setup_state(&database_url).await?;
    let user_id = create_user(&state, "user", "merge@example.com").await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Lamb Shoulder".into()),
        description: Set(None),
        price: Set(Decimal::from(80)),
        image: Set(None),
        selling_method: Set("weight_custom".into()),
        weight: Set(None),
        weight_unit: Set(Some("kg".into())),
        stock: Set(5),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let user_identity = ShopperIdentity {
        shopper: Shopper::User(user_id),
        user: Some(auth_user.clone()),
    };
    let guest = ShopperIdentity {
        shopper: Shopper::Guest("guest-session-2".into()),
        user: None,
    };

    let guest_cart = cart_service::add_to_cart(
        &state,
        &guest,
        AddToCartRequest {
            product_id: product.id,
            quantity: None,
            weight: Some("1.5".parse()?),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(guest_cart.total_price, Decimal::from(120));

    let merged = cart_service::merge_guest_cart(
        &state,
        &auth_user,
        MergeCartRequest {
            session_token: "guest-session-2".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(merged.items, guest_cart.items);

    // The persisted cart now equals the guest cart by value.
    let persisted = cart_service::get_cart(&state, &user_identity)
        .await?
        .data
        .unwrap();
    assert_eq!(persisted.items, guest_cart.items);
    assert_eq!(persisted.total_price, Decimal::from(120));

    // And the local guest copy is empty afterwards.
    let session_after = cart_service::get_cart(&state, &guest).await?.data.unwrap();
    assert!(session_after.items.is_empty());

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, carts, audit_logs, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        currency: "SAR".into(),
        payment: PaymentConfig {
            base_url: None,
            api_key: None,
            api_secret: None,
            allow_mock: true,
            // Keep the background poller out of the way; the test drives
            // polling by hand.
            poll_interval_secs: 3600,
        },
    };

    Ok(AppState::new(pool, orm, &config))
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}
