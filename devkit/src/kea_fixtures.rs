/*!
Builders for Kea Control Agent documents

Shapes follow what kea-dhcp4/kea-dhcp6 return through the Control Agent.
*/

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

pub struct KeaFixtures;

impl KeaFixtures {
    /// `{"id": .., "subnet": ..}` entry of `subnet4`/`subnet6`
    pub fn subnet(id: u32, prefix: &str) -> Value {
        json!({"id": id, "subnet": prefix})
    }

    /// `{"Dhcp4": ...}` document with top level subnets and one shared
    /// network per entry of `shared`
    pub fn dhcp4_config(subnets: Vec<Value>, shared: Vec<Vec<Value>>) -> Value {
        Self::dhcp_config("Dhcp4", "subnet4", subnets, shared)
    }

    pub fn dhcp6_config(subnets: Vec<Value>, shared: Vec<Vec<Value>>) -> Value {
        Self::dhcp_config("Dhcp6", "subnet6", subnets, shared)
    }

    fn dhcp_config(root: &str, subnets_key: &str, subnets: Vec<Value>, shared: Vec<Vec<Value>>) -> Value {
        let shared_networks: Vec<Value> = shared
            .into_iter()
            .enumerate()
            .map(|(index, subnets)| {
                let mut network = Map::new();
                network.insert("name".to_string(), Value::String(format!("shared-{}", index)));
                network.insert(subnets_key.to_string(), Value::Array(subnets));
                Value::Object(network)
            })
            .collect();

        let mut server = Map::new();
        server.insert(subnets_key.to_string(), Value::Array(subnets));
        server.insert("shared-networks".to_string(), Value::Array(shared_networks));

        let mut document = Map::new();
        document.insert(root.to_string(), Value::Object(server));
        Value::Object(document)
    }

    /// Successful `config-get` answer wrapping `config`
    pub fn config_get_response(config: Value) -> Value {
        json!([{"result": 0, "arguments": config}])
    }

    /// Successful `statistic-get` answer. Samples are `(value, timestamp)`.
    pub fn statistic_response(name: &str, samples: &[(i64, &str)]) -> Value {
        let series: Vec<Value> = samples.iter().map(|(value, ts)| json!([value, ts])).collect();
        let mut arguments = Map::new();
        arguments.insert(name.to_string(), Value::Array(series));
        json!([{"result": 0, "arguments": arguments}])
    }

    /// Answer carrying a non-success result code
    pub fn error_response(result: i64, text: &str) -> Value {
        json!([{"result": result, "text": text}])
    }

    /// Timestamp as Kea writes it in statistic samples (UTC, microseconds)
    pub fn kea_timestamp(at: DateTime<Utc>) -> String {
        at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    pub fn statistic_name(subnet_id: u32, key: &str) -> String {
        format!("subnet[{}].{}", subnet_id, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_networks_layout() {
        let config = KeaFixtures::dhcp6_config(
            vec![KeaFixtures::subnet(1, "2001:db8:1::/64")],
            vec![vec![KeaFixtures::subnet(2, "2001:db8:2::/64")]],
        );
        assert_eq!(config["Dhcp6"]["subnet6"][0]["id"], 1);
        assert_eq!(config["Dhcp6"]["shared-networks"][0]["subnet6"][0]["subnet"], "2001:db8:2::/64");
    }

    #[test]
    fn test_kea_timestamp() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(KeaFixtures::kea_timestamp(at), "2024-05-01 10:00:00.000000");
    }

    #[test]
    fn test_statistic_response() {
        let answer = KeaFixtures::statistic_response("subnet[1].total-addresses", &[(5, "2024-05-01 10:00:00.0")]);
        assert_eq!(answer[0]["result"], 0);
        assert_eq!(answer[0]["arguments"]["subnet[1].total-addresses"][0], json!([5, "2024-05-01 10:00:00.0"]));
    }
}
