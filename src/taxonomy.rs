// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Category taxonomies and batch reference data.
//!
//! A taxonomy declares the categories a distribution is dense over, plus
//! aliases that group raw source labels (survey columns, sensor types) into
//! those categories. A flow may carry several named taxonomies (transport,
//! food, shopping ...); each one gets its own metric cells, and a record is
//! routed to the one that both resolves its label and sums in its unit.

use crate::error::{EntropyError, Result};
use crate::model::{Flow, SensorSpec};
use crate::units::UnitTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Declared categories of one named taxonomy within a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub flow: Flow,
    /// Unique within the flow; part of every cell key.
    pub name: String,
    /// SI unit of the quantities summed in this taxonomy.
    pub unit: String,
    categories: Vec<String>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

impl Taxonomy {
    /// Name of the [`transport_modes`](Self::transport_modes) preset.
    pub const TRANSPORT: &'static str = "transport";

    /// Create a taxonomy named after its flow. Duplicate categories are
    /// dropped, declaration order is kept.
    pub fn new<S: AsRef<str>>(flow: Flow, unit: &str, categories: &[S]) -> Self {
        let mut declared: Vec<String> = Vec::with_capacity(categories.len());
        for category in categories {
            let category = category.as_ref().trim().to_string();
            if !category.is_empty() && !declared.contains(&category) {
                declared.push(category);
            }
        }
        Self {
            flow,
            name: flow.as_str().to_string(),
            unit: unit.to_string(),
            categories: declared,
            aliases: HashMap::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.trim().to_string();
        self
    }

    /// Map a raw source label onto a declared category.
    pub fn with_alias(mut self, label: &str, category: &str) -> Self {
        self.aliases.insert(Self::key(label), category.to_string());
        self
    }

    pub fn with_aliases(mut self, category: &str, labels: &[&str]) -> Self {
        for label in labels {
            self.aliases.insert(Self::key(label), category.to_string());
        }
        self
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Resolve a raw label to its declared category.
    pub fn resolve(&self, label: &str) -> Option<&str> {
        let key = Self::key(label);
        if let Some(category) = self.categories.iter().find(|c| Self::key(c) == key) {
            return Some(category.as_str());
        }
        self.aliases
            .get(&key)
            .filter(|c| self.contains(c))
            .map(String::as_str)
    }

    /// At least one declared category is required.
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(EntropyError::InsufficientTaxonomy {
                flow: self.flow,
                declared: 0,
            });
        }
        Ok(())
    }

    fn key(label: &str) -> String {
        label.trim().to_lowercase()
    }

    // ------------------------------------------------------------------
    // Presets
    // ------------------------------------------------------------------

    /// Transport modes grouped into public, private and active mobility.
    pub fn transport_modes(flow: Flow) -> Self {
        let unit = match flow {
            Flow::Energy => "J",
            Flow::Material => "m",
            Flow::Information => "count",
        };
        Self::new(flow, unit, &["public_transport", "car", "walk_bike"])
            .named(Self::TRANSPORT)
            .with_aliases("public_transport", &["bus", "metro", "tram", "public"])
            .with_aliases("car", &["taxi", "coche", "private_car", "car_use"])
            .with_aliases("walk_bike", &["bici", "bike", "bicycle", "pie", "walk", "walking"])
    }

    /// Food consumption by type.
    pub fn food_types() -> Self {
        Self::new(Flow::Material, "kg", &["red_meat", "poultry_fish", "seafood"])
            .named("food")
            .with_aliases("red_meat", &["carne_roja"])
            .with_aliases("poultry_fish", &["avepescado", "poultry", "fish"])
            .with_aliases("seafood", &["marisco"])
    }

    /// Food consumption by place.
    pub fn consumption_places() -> Self {
        Self::new(
            Flow::Material,
            "count",
            &["restaurant", "fastfood", "delivery", "homemade"],
        )
        .named("food_place")
        .with_aliases("restaurant", &["restaurante"])
        .with_aliases("delivery", &["domicilio"])
        .with_aliases("homemade", &["casera"])
    }

    /// Accommodation nights, with the lodging groupings used in survey reports.
    pub fn accommodation() -> Self {
        Self::new(
            Flow::Material,
            "count",
            &["airbnb", "hotel_3", "hotel_4", "hotel_5", "pension_hostel"],
        )
        .named("accommodation")
        .with_aliases(
            "airbnb",
            &[
                "Alojamiento local sin coste",
                "Apartamento de alquiler (AirBnb)",
            ],
        )
        .with_aliases("hotel_3", &["Hotel 3 estrellas"])
        .with_aliases("hotel_4", &["Hotel 4 estrellas"])
        .with_aliases("hotel_5", &["Hotel 5 estrellas"])
        .with_aliases("pension_hostel", &["Hotel 2 estrellas", "Pensión o hostal"])
    }

    /// Purchased items by kind.
    pub fn shopping() -> Self {
        Self::new(
            Flow::Material,
            "count",
            &["textiles", "crafts", "food", "souvenirs"],
        )
        .named("shopping")
        .with_aliases("textiles", &["compras_textiles_cantidad"])
        .with_aliases("crafts", &["artesania", "compras_artesania_cantidad"])
        .with_aliases("food", &["alimentacion", "compras_alimentacion_cantidad"])
        .with_aliases("souvenirs", &["compras_souvenirs_cantidad"])
    }

    /// Building energy use by measurement type, summed in joules.
    pub fn energy_measurements() -> Self {
        Self::new(
            Flow::Energy,
            "J",
            &["electricity", "heating", "cooling", "lighting"],
        )
        .named("building_energy")
        .with_aliases("electricity", &["power", "plug_load"])
        .with_aliases("heating", &["gas", "boiler"])
        .with_aliases("cooling", &["hvac_cooling", "chiller"])
    }

    /// Survey question topics for information flows.
    pub fn survey_topics() -> Self {
        Self::new(
            Flow::Information,
            "count",
            &["mobility", "food", "accommodation", "shopping", "origin"],
        )
        .named("survey")
        .with_aliases("mobility", &["transporte", "transport"])
        .with_aliases("food", &["alimentacion"])
        .with_aliases("accommodation", &["alojamiento"])
        .with_aliases("shopping", &["compras"])
        .with_aliases("origin", &["residencia", "procedencia"])
    }
}

/// Slowly-changing reference data shared read-only by every cell of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceData {
    pub units: UnitTable,
    /// Taxonomies by flow, then by name.
    pub taxonomies: BTreeMap<Flow, BTreeMap<String, Taxonomy>>,
    #[serde(default)]
    pub sensors: HashMap<String, SensorSpec>,
}

impl ReferenceData {
    pub fn new(units: UnitTable) -> Self {
        Self {
            units,
            taxonomies: BTreeMap::new(),
            sensors: HashMap::new(),
        }
    }

    /// Install (or replace) a taxonomy under its flow and name.
    pub fn insert_taxonomy(&mut self, taxonomy: Taxonomy) {
        self.taxonomies
            .entry(taxonomy.flow)
            .or_default()
            .insert(taxonomy.name.clone(), taxonomy);
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.insert_taxonomy(taxonomy);
        self
    }

    pub fn insert_sensor(&mut self, spec: SensorSpec) {
        self.sensors.insert(spec.sensor_id.clone(), spec);
    }

    pub fn with_sensor(mut self, spec: SensorSpec) -> Self {
        self.insert_sensor(spec);
        self
    }

    pub fn taxonomy(&self, flow: Flow, name: &str) -> Option<&Taxonomy> {
        self.taxonomies.get(&flow).and_then(|t| t.get(name))
    }

    /// Taxonomies of one flow, in name order.
    pub fn taxonomies_of(&self, flow: Flow) -> impl Iterator<Item = &Taxonomy> {
        self.taxonomies.get(&flow).into_iter().flat_map(|t| t.values())
    }

    /// Every (flow, taxonomy) pair, i.e. the series that get metric cells.
    pub fn series(&self) -> Vec<(Flow, String)> {
        self.taxonomies
            .iter()
            .flat_map(|(flow, named)| named.keys().map(move |name| (*flow, name.clone())))
            .collect()
    }

    /// Route a label in `si_unit` to the first taxonomy of the flow (in name
    /// order) that resolves the label and sums in that unit.
    ///
    /// A label only resolved by taxonomies of another unit is an
    /// `IncompatibleUnit`; a label no taxonomy resolves is `UnknownCategory`.
    pub fn route(
        &self,
        record: &str,
        flow: Flow,
        label: &str,
        si_unit: &str,
    ) -> Result<(&Taxonomy, String)> {
        let mut mismatch: Option<&Taxonomy> = None;
        for taxonomy in self.taxonomies_of(flow) {
            let Some(category) = taxonomy.resolve(label) else {
                continue;
            };
            if taxonomy.unit == si_unit {
                return Ok((taxonomy, category.to_string()));
            }
            if mismatch.is_none() {
                mismatch = Some(taxonomy);
            }
        }
        match mismatch {
            Some(taxonomy) => Err(EntropyError::IncompatibleUnit {
                record: record.to_string(),
                unit: si_unit.to_string(),
                expected: taxonomy.unit.clone(),
            }),
            None => Err(EntropyError::UnknownCategory {
                flow,
                label: label.to_string(),
            }),
        }
    }

    /// Taxonomy an excluded row is counted against: the first one that
    /// resolves its label, or the flow's only taxonomy. Rows matching
    /// neither are reported at batch level only.
    pub fn attribute(&self, flow: Flow, label: &str) -> Option<&Taxonomy> {
        if let Some(taxonomy) = self
            .taxonomies_of(flow)
            .find(|t| t.resolve(label).is_some())
        {
            return Some(taxonomy);
        }
        let mut all = self.taxonomies_of(flow);
        match (all.next(), all.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}
