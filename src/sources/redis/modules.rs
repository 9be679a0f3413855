use event::tags;
use event::tags::Tags;

use super::builder::MetricBuilder;
use super::client::Value;

// 1) 1) "name"
//    2) "search"
//    3) "ver"
//    4) (integer) 20612
//    5) "path"
//    6) "/usr/lib/redis/modules/redisearch.so"
fn parse_modules(reply: &Value) -> Vec<(String, String)> {
    let Some(modules) = reply.as_array() else {
        return vec![];
    };

    modules
        .iter()
        .filter_map(|module| {
            let fields = module.as_array()?;

            let mut name = None;
            let mut version = String::new();
            for pair in fields.chunks_exact(2) {
                match pair[0].as_str() {
                    Some("name") => name = pair[1].as_str().map(String::from),
                    Some("ver") => {
                        version = match &pair[1] {
                            Value::Int(v) => v.to_string(),
                            other => other.as_str().unwrap_or_default().to_string(),
                        }
                    }
                    _ => {}
                }
            }

            Some((name?, version))
        })
        .collect()
}

/// Record the reply of `MODULE LIST`.
pub fn record_modules(mb: &mut MetricBuilder, reply: &Value) {
    let modules = parse_modules(reply);

    mb.gauge(
        "redis.modules.loaded",
        "Number of loaded modules",
        "{module}",
        modules.len(),
        Tags::default(),
    );

    for (name, version) in modules {
        mb.gauge(
            "redis.module.info",
            "Loaded module, the value is always 1",
            "1",
            1,
            tags!("module" => name, "version" => version),
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn record() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                Value::Data("name".into()),
                Value::Data("search".into()),
                Value::Data("ver".into()),
                Value::Int(20612),
                Value::Data("path".into()),
                Value::Data("/usr/lib/redis/modules/redisearch.so".into()),
                Value::Data("args".into()),
                Value::Array(vec![]),
            ]),
            Value::Array(vec![Value::Data("ver".into()), Value::Int(1)]),
        ]);

        let mut mb = MetricBuilder::new(Utc::now());
        record_modules(&mut mb, &reply);

        assert_eq!(mb.value("redis.modules.loaded"), 1.0);
        let info = mb.find("redis.module.info");
        assert_eq!(info[0].tag_value("module").as_deref(), Some("search"));
        assert_eq!(info[0].tag_value("version").as_deref(), Some("20612"));
    }

    #[test]
    fn no_modules() {
        let mut mb = MetricBuilder::new(Utc::now());
        record_modules(&mut mb, &Value::Array(vec![]));

        assert_eq!(mb.value("redis.modules.loaded"), 0.0);
        assert_eq!(mb.len(), 1);
    }
}
