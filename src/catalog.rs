use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::OrderError;

/// Sort keys accepted by the product list endpoint. The displayed
/// price follows the chosen key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSort {
    SellingPriceDescending,
    BuyingPriceAscending,
    OriginalPriceDescending,
    OriginalPriceAscending,
}

impl ProductSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "selling-price-descending" => Some(ProductSort::SellingPriceDescending),
            "buying-price-ascending" => Some(ProductSort::BuyingPriceAscending),
            "original-price-descending" => Some(ProductSort::OriginalPriceDescending),
            "original-price-ascending" => Some(ProductSort::OriginalPriceAscending),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductSort::SellingPriceDescending => "selling-price-descending",
            ProductSort::BuyingPriceAscending => "buying-price-ascending",
            ProductSort::OriginalPriceDescending => "original-price-descending",
            ProductSort::OriginalPriceAscending => "original-price-ascending",
        }
    }

    fn order_clause(self) -> &'static str {
        match self {
            ProductSort::SellingPriceDescending => "p.current_selling_price DESC NULLS LAST",
            ProductSort::BuyingPriceAscending => "p.current_buying_price ASC NULLS LAST",
            ProductSort::OriginalPriceDescending => "p.original_price DESC",
            ProductSort::OriginalPriceAscending => "p.original_price ASC",
        }
    }

    fn price_column(self) -> &'static str {
        match self {
            ProductSort::SellingPriceDescending => "current_selling_price",
            ProductSort::BuyingPriceAscending => "current_buying_price",
            ProductSort::OriginalPriceDescending | ProductSort::OriginalPriceAscending => {
                "original_price"
            }
        }
    }
}

impl Default for ProductSort {
    fn default() -> Self {
        ProductSort::SellingPriceDescending
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub author_id: Option<i64>,
    pub theme_id: Option<i64>,
    pub color_id: Option<i64>,
    pub size_id: Option<i64>,
    pub sort: ProductSort,
    /// Page index; the query skips `page * limit` rows.
    pub page: i64,
    pub limit: i64,
}

/// Category option lists for the catalog filter sidebar.
pub async fn category_options(db: &PgPool) -> Result<serde_json::Value, OrderError> {
    let mut results = Vec::with_capacity(4);
    for (label, table) in [
        ("author", "authors"),
        ("theme", "themes"),
        ("color", "colors"),
        ("size", "sizes"),
    ] {
        let rows = sqlx::query(&format!("SELECT id, name FROM {table} ORDER BY id"))
            .fetch_all(db)
            .await?;
        let options: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.get::<i64, _>("id"),
                    "name": r.get::<String, _>("name"),
                })
            })
            .collect();
        results.push(serde_json::json!({
            "category_name": label,
            "option": options,
        }));
    }
    Ok(serde_json::json!({ "results": results }))
}

/// Filtered, sorted, paginated product list with image URLs and the
/// price matching the sort key.
pub async fn list_products(
    db: &PgPool,
    filter: &ProductFilter,
) -> Result<Vec<serde_json::Value>, OrderError> {
    let limit = filter.limit.clamp(1, 500);
    let offset = filter.page.max(0) * limit;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT p.id, p.name, p.author_id, a.name AS author_name, \
                p.current_buying_price, p.current_selling_price, p.original_price \
         FROM products p \
         LEFT JOIN authors a ON a.id = p.author_id",
    );
    if filter.theme_id.is_some() {
        qb.push(" JOIN products_themes pt ON pt.product_id = p.id");
    }
    if filter.color_id.is_some() {
        qb.push(" JOIN products_colors pc ON pc.product_id = p.id");
    }
    qb.push(" WHERE 1 = 1");
    if let Some(author_id) = filter.author_id {
        qb.push(" AND p.author_id = ").push_bind(author_id);
    }
    if let Some(theme_id) = filter.theme_id {
        qb.push(" AND pt.theme_id = ").push_bind(theme_id);
    }
    if let Some(color_id) = filter.color_id {
        qb.push(" AND pc.color_id = ").push_bind(color_id);
    }
    if let Some(size_id) = filter.size_id {
        qb.push(" AND p.size_id = ").push_bind(size_id);
    }
    qb.push(" ORDER BY ");
    qb.push(filter.sort.order_clause());
    qb.push(" OFFSET ").push_bind(offset);
    qb.push(" LIMIT ").push_bind(limit);

    let rows = qb.build().fetch_all(db).await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("id")).collect();
    let mut images: HashMap<i64, Vec<String>> = HashMap::new();
    if !ids.is_empty() {
        let image_rows = sqlx::query(
            "SELECT product_id, image_url FROM product_images \
             WHERE product_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        for r in image_rows {
            images
                .entry(r.get::<i64, _>("product_id"))
                .or_default()
                .push(r.get::<String, _>("image_url"));
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let id: i64 = r.get("id");
        let price: Option<Decimal> = r.get(filter.sort.price_column());
        out.push(serde_json::json!({
            "product_id": id,
            "product_name": r.get::<String, _>("name"),
            "product_price": price,
            "sort_name": filter.sort.as_str(),
            "author_id": r.get::<Option<i64>, _>("author_id"),
            "author_name": r.get::<Option<String>, _>("author_name"),
            "image": images.remove(&id).unwrap_or_default(),
        }));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keys_roundtrip() {
        for sort in [
            ProductSort::SellingPriceDescending,
            ProductSort::BuyingPriceAscending,
            ProductSort::OriginalPriceDescending,
            ProductSort::OriginalPriceAscending,
        ] {
            assert_eq!(ProductSort::parse(sort.as_str()), Some(sort));
        }
        assert_eq!(ProductSort::parse("price"), None);
    }

    #[test]
    fn displayed_price_follows_sort_key() {
        assert_eq!(
            ProductSort::SellingPriceDescending.price_column(),
            "current_selling_price"
        );
        assert_eq!(
            ProductSort::BuyingPriceAscending.price_column(),
            "current_buying_price"
        );
        assert_eq!(
            ProductSort::OriginalPriceAscending.price_column(),
            "original_price"
        );
    }

    #[test]
    fn default_sort_is_selling_price_descending() {
        assert_eq!(ProductSort::default(), ProductSort::SellingPriceDescending);
    }
}
