//! Product, variant and stock-keeping-unit keys.

use serde::{Deserialize, Serialize};

/// Variant segment used in a [`SkuKey`] when a product has no variant.
pub const DEFAULT_VARIANT: &str = "default";

/// Product identifier as issued by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Variant identifier within a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(String);

impl VariantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VariantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VariantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key of one stock-keeping unit: a product plus its variant, or
/// [`DEFAULT_VARIANT`] when the product is not split into variants.
///
/// Renders as `product:variant`, which is also the storage key of the
/// per-SKU reserved counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkuKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl SkuKey {
    pub fn new(product_id: impl Into<ProductId>, variant_id: Option<VariantId>) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
        }
    }

    /// The variant segment, falling back to [`DEFAULT_VARIANT`].
    pub fn variant_segment(&self) -> &str {
        self.variant_id
            .as_ref()
            .map(VariantId::as_str)
            .unwrap_or(DEFAULT_VARIANT)
    }

    /// Storage key of the reserved counter for this SKU.
    pub fn counter_key(&self) -> String {
        format!("{}:{}", self.product_id, self.variant_segment())
    }

    /// Parses a counter key produced by [`SkuKey::counter_key`].
    ///
    /// The product part may itself contain `:`; only the last segment is
    /// treated as the variant.
    pub fn from_counter_key(key: &str) -> Option<Self> {
        let (product, variant) = key.rsplit_once(':')?;
        if product.is_empty() || variant.is_empty() {
            return None;
        }
        let variant_id = (variant != DEFAULT_VARIANT).then(|| VariantId::new(variant));
        Some(Self::new(product, variant_id))
    }
}

impl std::fmt::Display for SkuKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.product_id, self.variant_segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_key_uses_default_variant() {
        let sku = SkuKey::new("prod-1", None);
        assert_eq!(sku.counter_key(), "prod-1:default");
        assert_eq!(sku.to_string(), "prod-1:default");
    }

    #[test]
    fn counter_key_with_variant() {
        let sku = SkuKey::new("prod-1", Some(VariantId::new("red-xl")));
        assert_eq!(sku.counter_key(), "prod-1:red-xl");
    }

    #[test]
    fn from_counter_key_inverts_counter_key() {
        let plain = SkuKey::new("prod-1", None);
        let variant = SkuKey::new("gid:prod:7", Some(VariantId::new("blue")));

        assert_eq!(SkuKey::from_counter_key(&plain.counter_key()), Some(plain));
        assert_eq!(
            SkuKey::from_counter_key(&variant.counter_key()),
            Some(variant)
        );
    }

    #[test]
    fn from_counter_key_rejects_malformed_keys() {
        assert_eq!(SkuKey::from_counter_key("no-separator"), None);
        assert_eq!(SkuKey::from_counter_key(":default"), None);
        assert_eq!(SkuKey::from_counter_key("prod:"), None);
    }
}
