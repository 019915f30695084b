use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use offhours_store::StoreError;

pub(crate) type Item = HashMap<String, AttributeValue>;

/// Fetch a required string attribute.
pub(crate) fn get_s(item: &Item, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|attr| attr.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::InvalidItem(format!("missing string attribute {name}")))
}

/// Fetch an optional string attribute.
pub(crate) fn get_opt_s(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(|attr| attr.as_s().ok()).cloned()
}

/// Fetch an optional string-set attribute.
pub(crate) fn get_opt_ss(item: &Item, name: &str) -> Option<Vec<String>> {
    item.get(name).and_then(|attr| attr.as_ss().ok()).cloned()
}

/// Fetch an optional boolean attribute.
pub(crate) fn get_opt_bool(item: &Item, name: &str) -> Option<bool> {
    item.get(name).and_then(|attr| attr.as_bool().ok()).copied()
}

/// Fetch a required numeric attribute as `i32`.
pub(crate) fn get_n_i32(item: &Item, name: &str) -> Result<i32, StoreError> {
    item.get(name)
        .and_then(|attr| attr.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StoreError::InvalidItem(format!("missing numeric attribute {name}")))
}

/// Fetch a required numeric attribute as `u32`.
pub(crate) fn get_n_u32(item: &Item, name: &str) -> Result<u32, StoreError> {
    item.get(name)
        .and_then(|attr| attr.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StoreError::InvalidItem(format!("missing numeric attribute {name}")))
}

/// Insert a string attribute when the value is present.
pub(crate) fn put_opt_s(item: &mut Item, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        item.insert(name.to_owned(), AttributeValue::S(value.to_owned()));
    }
}

/// Insert a string-set attribute when the set is present and non-empty.
/// DynamoDB rejects empty string sets, so they are simply omitted.
pub(crate) fn put_opt_ss<S: AsRef<str>>(item: &mut Item, name: &str, values: Option<&[S]>) {
    if let Some(values) = values {
        if !values.is_empty() {
            item.insert(
                name.to_owned(),
                AttributeValue::Ss(values.iter().map(|v| v.as_ref().to_owned()).collect()),
            );
        }
    }
}

/// Insert a boolean attribute when the value is present.
pub(crate) fn put_opt_bool(item: &mut Item, name: &str, value: Option<bool>) {
    if let Some(value) = value {
        item.insert(name.to_owned(), AttributeValue::Bool(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut item = Item::new();
        put_opt_s(&mut item, "name", Some("biz"));
        put_opt_s(&mut item, "missing", None);
        assert_eq!(get_s(&item, "name").unwrap(), "biz");
        assert!(get_opt_s(&item, "missing").is_none());
        assert!(matches!(
            get_s(&item, "missing").unwrap_err(),
            StoreError::InvalidItem(_)
        ));
    }

    #[test]
    fn empty_string_set_is_omitted() {
        let mut item = Item::new();
        let empty: Vec<String> = Vec::new();
        put_opt_ss(&mut item, "periods", Some(empty.as_slice()));
        assert!(item.is_empty());

        put_opt_ss(&mut item, "periods", Some(["a".to_owned()].as_slice()));
        assert_eq!(get_opt_ss(&item, "periods").unwrap(), vec!["a"]);
    }

    #[test]
    fn numeric_parsing() {
        let mut item = Item::new();
        item.insert("n".to_owned(), AttributeValue::N("42".to_owned()));
        assert_eq!(get_n_i32(&item, "n").unwrap(), 42);
        assert_eq!(get_n_u32(&item, "n").unwrap(), 42);

        item.insert("bad".to_owned(), AttributeValue::N("x".to_owned()));
        assert!(get_n_i32(&item, "bad").is_err());
    }

    #[test]
    fn bool_attribute() {
        let mut item = Item::new();
        put_opt_bool(&mut item, "enforced", Some(true));
        assert_eq!(get_opt_bool(&item, "enforced"), Some(true));
        assert_eq!(get_opt_bool(&item, "missing"), None);
    }
}
