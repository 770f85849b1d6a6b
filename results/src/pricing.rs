use std::{collections::BTreeMap, fs::File, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// On-demand prices per region and instance type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    instances: BTreeMap<String, BTreeMap<String, InstancePrice>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstancePrice {
    #[serde(default, deserialize_with = "lenient_price")]
    pub cost_per_hour: Option<f64>,
}

fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Price>::deserialize(deserializer)? {
        Some(Price::Number(price)) => Some(price),
        Some(Price::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

impl Pricing {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;
        serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse file {}", path.display()))
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    pub fn cost_per_hour(&self, region: &str, instance_type: &str) -> Option<f64> {
        self.instances
            .get(region)?
            .get(instance_type)?
            .cost_per_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prices() {
        let pricing: Pricing = serde_json::from_str(
            r#"{
                "instances": {
                    "us-west-2": {
                        "g5.xlarge": {"cost_per_hour": 1.006},
                        "p3.2xlarge": {"cost_per_hour": "3.06"},
                        "p5.48xlarge": {"cost_per_hour": null}
                    },
                    "eu-west-1": {
                        "g5.xlarge": {}
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(pricing.cost_per_hour("us-west-2", "g5.xlarge"), Some(1.006));
        assert_eq!(pricing.cost_per_hour("us-west-2", "p3.2xlarge"), Some(3.06));
        assert_eq!(pricing.cost_per_hour("us-west-2", "p5.48xlarge"), None);
        assert_eq!(pricing.cost_per_hour("eu-west-1", "g5.xlarge"), None);
        assert_eq!(pricing.cost_per_hour("ap-south-1", "g5.xlarge"), None);
        assert_eq!(pricing.regions().collect::<Vec<_>>(), vec!["eu-west-1", "us-west-2"]);
    }
}
