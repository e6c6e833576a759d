//! PropertyMap: the key-value store on nodes and relationships, and the
//! parameter map passed alongside every query.

use std::collections::HashMap;
use super::Value;

/// A map of property names to values.
pub type PropertyMap = HashMap<String, Value>;

/// Build a [`PropertyMap`] from `key => value` pairs.
///
/// ```
/// use neo4j_berries_ogm::params;
///
/// let p = params! { "title" => "Alien", "year" => 1979 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::PropertyMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::PropertyMap::new();
        $( map.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        map
    }};
}
