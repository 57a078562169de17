//! Built-in component spec catalog
//!
//! Maps a component type to the container template its warm replicas are
//! spawned from. Unknown types are not an error; warm-up skips them.

use std::collections::BTreeMap;

use crate::inputs::{ContainerSpec, PortBinding};

/// Look up the built-in spec for a component type.
pub fn builtin_spec(component_type: &str) -> Option<ContainerSpec> {
    let spec = match component_type {
        "ddb" => ContainerSpec {
            repository: "amazon/dynamodb-local".to_string(),
            tag: "2.5.4".to_string(),
            env: BTreeMap::new(),
            cmd: vec![],
            port_bindings: main_tcp_port(8000),
        },
        "localstack" => ContainerSpec {
            repository: "localstack/localstack".to_string(),
            tag: "4.1.0".to_string(),
            env: BTreeMap::new(),
            cmd: vec![],
            port_bindings: main_tcp_port(4566),
        },
        "mysql" => ContainerSpec {
            repository: "mysql/mysql-server".to_string(),
            tag: "8.0".to_string(),
            env: BTreeMap::from([
                ("MYSQL_DATABASE".to_string(), "gosoline".to_string()),
                ("MYSQL_USER".to_string(), "gosoline".to_string()),
                ("MYSQL_PASSWORD".to_string(), "gosoline".to_string()),
                ("MYSQL_ROOT_PASSWORD".to_string(), "gosoline".to_string()),
                ("MYSQL_ROOT_HOST".to_string(), "%".to_string()),
            ]),
            cmd: vec![
                "--sql_mode=NO_ENGINE_SUBSTITUTION".to_string(),
                "--log-bin-trust-function-creators=TRUE".to_string(),
                "--max_connections=1000".to_string(),
            ],
            port_bindings: main_tcp_port(3306),
        },
        "redis" => ContainerSpec {
            repository: "redis".to_string(),
            tag: "7-alpine".to_string(),
            env: BTreeMap::new(),
            cmd: vec![],
            port_bindings: main_tcp_port(6379),
        },
        "s3" => ContainerSpec {
            repository: "minio/minio".to_string(),
            tag: "RELEASE.2024-02-17T01-15-57Z".to_string(),
            env: BTreeMap::from([
                ("MINIO_ACCESS_KEY".to_string(), "gosoline".to_string()),
                ("MINIO_SECRET_KEY".to_string(), "gosoline".to_string()),
            ]),
            cmd: vec!["server".to_string(), "/data".to_string()],
            port_bindings: main_tcp_port(9000),
        },
        "wiremock" => ContainerSpec {
            repository: "wiremock/wiremock".to_string(),
            tag: "3.4.1".to_string(),
            env: BTreeMap::new(),
            cmd: vec!["--local-response-templating".to_string()],
            port_bindings: main_tcp_port(8080),
        },
        _ => return None,
    };

    Some(spec)
}

fn main_tcp_port(port: i32) -> BTreeMap<String, PortBinding> {
    BTreeMap::from([(
        "main".to_string(),
        PortBinding {
            container_port: port,
            protocol: "tcp".to_string(),
        },
    )])
}
