//! Typed calls for the demo backend's authenticated endpoints

use crate::client::AuthClient;
use crate::error::Result;
use crate::types::{CredentialMode, RequestDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One product of a product listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Page of products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
}

/// Paging for [`AuthClient::products`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductQuery {
    pub page: u32,
    pub limit: u32,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self { page: 0, limit: 10 }
    }
}

impl ProductQuery {
    /// Endpoint path for this page
    pub fn path(&self) -> String {
        format!(
            "/auth/products?limit={}&skip={}&select=title,price,thumbnail",
            self.limit,
            u64::from(self.page) * u64::from(self.limit)
        )
    }
}

impl AuthClient {
    /// Profile of the logged-in user
    pub async fn current_user(&self) -> Result<Value> {
        let request = RequestDescriptor::get("/auth/me").credentials(CredentialMode::Include);
        self.execute(&request).await
    }

    /// One page of products
    pub async fn products(&self, query: ProductQuery) -> Result<ProductPage> {
        let request = RequestDescriptor::get(query.path()).credentials(CredentialMode::Include);
        self.execute_as(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_query_path() {
        assert_eq!(
            ProductQuery::default().path(),
            "/auth/products?limit=10&skip=0&select=title,price,thumbnail"
        );
        assert_eq!(
            ProductQuery { page: 3, limit: 10 }.path(),
            "/auth/products?limit=10&skip=30&select=title,price,thumbnail"
        );
    }

    #[test]
    fn test_product_page_tolerates_sparse_products() {
        let page: ProductPage = serde_json::from_str(
            r#"{"products":[{"id":1,"title":"Mascara","price":9.99}],"total":194,"skip":0,"limit":1}"#,
        )
        .unwrap();
        assert_eq!(page.products[0].title, "Mascara");
        assert_eq!(page.products[0].thumbnail, None);
        assert_eq!(page.total, 194);
    }
}
