use std::{cmp::Ordering, collections::BTreeMap};

use serde::Serialize;

use crate::{
    aggregate::{ModifiedBases, Summary},
    pricing::Pricing,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cost {
    pub per_run: f64,
    pub per_gigabase: f64,
    pub per_whg_30x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub modified_bases: ModifiedBases,
    pub compute_environment: String,
    pub instance_type: String,
    pub num_gpus: u32,
    pub data_set_id: String,
    pub basecaller: String,
    pub samples_per_s: f64,
    pub runtime_hours: f64,
    pub runtime_per_gigabase: f64,
    pub runtime_per_whg_30x: f64,
    /// Keyed by region, only regions with a known price.
    pub cost: BTreeMap<String, Cost>,
}

impl ReportRow {
    pub fn new(summary: Summary, pricing: &Pricing) -> Self {
        let cost = pricing
            .regions()
            .filter_map(|region| {
                let price = pricing.cost_per_hour(region, &summary.instance_type)?;
                Some((
                    region.to_owned(),
                    Cost {
                        per_run: price * summary.runtime_hours,
                        per_gigabase: price * summary.runtime_per_gigabase(),
                        per_whg_30x: price * summary.runtime_per_whg_30x(),
                    },
                ))
            })
            .collect();
        ReportRow {
            runtime_per_gigabase: summary.runtime_per_gigabase(),
            runtime_per_whg_30x: summary.runtime_per_whg_30x(),
            modified_bases: summary.modified_bases,
            compute_environment: summary.compute_environment,
            instance_type: summary.instance_type,
            num_gpus: summary.num_gpus,
            data_set_id: summary.data_set_id,
            basecaller: summary.basecaller,
            samples_per_s: summary.samples_per_s,
            runtime_hours: summary.runtime_hours,
            cost,
        }
    }
}

/// Rows grouped by modified bases, fastest first.
pub fn build(summaries: Vec<Summary>, pricing: &Pricing) -> Vec<ReportRow> {
    let mut rows: Vec<_> = summaries
        .into_iter()
        .map(|summary| ReportRow::new(summary, pricing))
        .collect();
    rows.sort_by(|a, b| {
        a.modified_bases.cmp(&b.modified_bases).then_with(|| {
            b.samples_per_s
                .partial_cmp(&a.samples_per_s)
                .unwrap_or(Ordering::Equal)
        })
    });
    rows
}

pub fn print(rows: &[ReportRow], region: &str) {
    println!(
        "{: <18} {: <20} {: <16} {: <5} {: <20} {: >14} {: >10} {: >12} {: >12}",
        "MODIFIED BASES",
        "COMPUTE ENVIRONMENT",
        "INSTANCE TYPE",
        "GPUS",
        "BASECALLER",
        "SAMPLES/S",
        "HOURS",
        "HOURS/WHG30X",
        "$/WHG30X"
    );
    for row in rows {
        let cost = row
            .cost
            .get(region)
            .map_or_else(|| "-".to_string(), |cost| format!("{:.2}", cost.per_whg_30x));
        println!(
            "{: <18} {: <20} {: <16} {: <5} {: <20} {: >14.4e} {: >10.3} {: >12.2} {: >12}",
            row.modified_bases.to_string(),
            row.compute_environment,
            row.instance_type,
            row.num_gpus,
            row.basecaller,
            row.samples_per_s,
            row.runtime_hours,
            row.runtime_per_whg_30x,
            cost
        );
    }
}
