//! Devices index template

use serde_json::{json, Value};

/// Index template declaring the fixed fields and the dynamic rules that
/// type encoded attribute fields by their suffix.
pub fn devices_index_template(index_name: &str, shards: u32, replicas: u32) -> Value {
    json!({
        "index_patterns": [index_name],
        "priority": 1,
        "template": {
            "settings": {
                "number_of_shards": shards,
                "number_of_replicas": replicas,
            },
            "mappings": {
                "dynamic": "true",
                "_source": {
                    "enabled": true,
                },
                "properties": {
                    "id": { "type": "keyword" },
                    "tenant_id": { "type": "keyword" },
                    "name": { "type": "keyword" },
                    "group_name": { "type": "keyword" },
                    "status": { "type": "keyword" },
                    "created_at": { "type": "date" },
                    "updated_at": { "type": "date" },
                    "location": { "type": "geo_point" },
                },
                "dynamic_templates": [
                    {
                        "versions": {
                            "match": "*_version*",
                            "mapping": { "type": "version" },
                        }
                    },
                    {
                        "strings": {
                            "match": "*_str",
                            "mapping": { "type": "keyword" },
                        }
                    },
                    {
                        "numerics": {
                            "match": "*_num",
                            "mapping": { "type": "double" },
                        }
                    },
                    {
                        "booleans": {
                            "match": "*_bool",
                            "mapping": { "type": "boolean" },
                        }
                    },
                ],
            },
        },
    })
}
