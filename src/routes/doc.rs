use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    cart::{Cart, CartItem},
    dto::{
        cart::{AddToCartRequest, MergeCartRequest, UpdateCartItemRequest},
        checkout::{
            CheckoutRequest, CheckoutResponse, ConfirmCheckoutRequest, ConfirmCheckoutResponse,
        },
        orders::{OrderList, OrderLookupRequest, OrderLookupResponse, OrderWithItems},
        payments::{PaymentCodeResponse, RequestPaymentRequest},
        products,
    },
    models::{
        Coordinates, DeliveryMethod, Order, OrderItem, Product, SellingMethod, ShippingAddress,
        User,
    },
    payment::{PaymentStatus, StatusReport},
    pricing::Quote,
    response::{ApiResponse, Meta},
    routes::{
        admin, auth, cart, checkout, health, orders, params, payments,
        products as product_routes,
    },
    status::OrderStatus,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        cart::merge_cart,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        checkout::stage_checkout,
        checkout::confirm_checkout,
        payments::request_payment_code,
        payments::get_payment_status,
        orders::list_orders,
        orders::get_order,
        orders::lookup_order,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status
    ),
    components(
        schemas(
            User,
            Product,
            SellingMethod,
            DeliveryMethod,
            Coordinates,
            ShippingAddress,
            Cart,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            StatusReport,
            Quote,
            AddToCartRequest,
            UpdateCartItemRequest,
            MergeCartRequest,
            CheckoutRequest,
            CheckoutResponse,
            ConfirmCheckoutRequest,
            ConfirmCheckoutResponse,
            RequestPaymentRequest,
            PaymentCodeResponse,
            OrderLookupRequest,
            OrderLookupResponse,
            OrderList,
            OrderWithItems,
            admin::UpdateOrderStatusRequest,
            admin::TransitionOutcome,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::ProductList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<Cart>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<PaymentCodeResponse>,
            ApiResponse<StatusReport>,
            ApiResponse<ConfirmCheckoutResponse>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<admin::TransitionOutcome>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Checkout", description = "Checkout staging and confirmation"),
        (name = "Payments", description = "Payment code generation and polling"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
        (name = "Auth", description = "Authentication endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
