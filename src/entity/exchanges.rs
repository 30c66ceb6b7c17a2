use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "exchanges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub prompt: String,
    pub response_text: Option<String>,
    pub images: Option<String>,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
