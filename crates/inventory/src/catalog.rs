//! Product catalog collaborator.
//!
//! The catalog owns stock quantities. The ledger reads stock before a reserve
//! and decrements it only when a reservation is confirmed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ProductId, SkuKey, VariantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Variant not found: {0}")]
    VariantNotFound(SkuKey),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Stock of one sellable variant. A `None` variant is the product itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub variants: Vec<ProductVariant>,
}

impl Product {
    /// Stock of the given variant; an unknown variant has stock 0.
    pub fn stock_for(&self, variant_id: Option<&VariantId>) -> i64 {
        self.variants
            .iter()
            .find(|v| v.variant_id.as_ref() == variant_id)
            .map(|v| v.stock)
            .unwrap_or(0)
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, product_id: &ProductId) -> Result<Option<Product>, CatalogError>;

    async fn decrement_inventory(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
    ) -> Result<(), CatalogError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<ProductId, Product>,
    fail_on_decrement: bool,
    fail_on_read: bool,
}

/// In-memory catalog for tests and the demo binary.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stock of a variant, creating the product if needed.
    pub async fn set_stock(
        &self,
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
        stock: i64,
    ) {
        let product_id = product_id.into();
        let mut state = self.state.write().await;
        let product = state
            .products
            .entry(product_id.clone())
            .or_insert_with(|| Product {
                id: product_id,
                variants: Vec::new(),
            });

        match product
            .variants
            .iter_mut()
            .find(|v| v.variant_id == variant_id)
        {
            Some(variant) => variant.stock = stock,
            None => product.variants.push(ProductVariant { variant_id, stock }),
        }
    }

    /// Current stock of a variant, `None` if the product or variant is unknown.
    pub async fn stock(&self, product_id: &ProductId, variant_id: Option<&VariantId>) -> Option<i64> {
        let state = self.state.read().await;
        state
            .products
            .get(product_id)?
            .variants
            .iter()
            .find(|v| v.variant_id.as_ref() == variant_id)
            .map(|v| v.stock)
    }

    /// Configures the catalog to fail every decrement.
    pub async fn set_fail_on_decrement(&self, fail: bool) {
        self.state.write().await.fail_on_decrement = fail;
    }

    /// Configures the catalog to fail every read.
    pub async fn set_fail_on_read(&self, fail: bool) {
        self.state.write().await.fail_on_read = fail;
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn find_by_id(&self, product_id: &ProductId) -> Result<Option<Product>, CatalogError> {
        let state = self.state.read().await;
        if state.fail_on_read {
            return Err(CatalogError::Unavailable("simulated read failure".to_string()));
        }
        Ok(state.products.get(product_id).cloned())
    }

    async fn decrement_inventory(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.write().await;
        if state.fail_on_decrement {
            return Err(CatalogError::Unavailable(
                "simulated decrement failure".to_string(),
            ));
        }

        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| CatalogError::ProductNotFound(product_id.clone()))?;
        let variant = product
            .variants
            .iter_mut()
            .find(|v| v.variant_id.as_ref() == variant_id)
            .ok_or_else(|| {
                CatalogError::VariantNotFound(SkuKey::new(product_id.clone(), variant_id.cloned()))
            })?;

        variant.stock = (variant.stock - i64::from(quantity)).max(0);
        Ok(())
    }
}
