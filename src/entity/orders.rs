use sea_orm::entity::prelude::*;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    #[sea_orm(unique)]
    pub reference: String,
    /// Idempotency anchor: one staged checkout materializes at most once.
    #[sea_orm(unique)]
    pub staging_token: String,
    pub phone_number: String,
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub delivery_fee: Decimal,
    pub total_price: Decimal,
    pub status: String,
    pub is_paid: bool,
    pub paid_at: Option<DateTimeWithTimeZone>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTimeWithTimeZone>,
    pub shipping_address: Value,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
