//! # Unit Conversion Registry
//!
//! Pairwise unit-to-unit multiplicative factors, closed under identity.
//! The registry is advisory: it does not prove soundness of conversions, and
//! reverse edges are not required to exist.

use std::collections::HashMap;

/// A directed conversion edge: `to = from * factor`
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConversion {
    pub from_unit: String,
    pub to_unit: String,
    pub factor: f64,
}

impl UnitConversion {
    pub fn convert(&self, value: f64) -> f64 {
        value * self.factor
    }
}

/// Registry of unit conversions, seeded with a canonical table for energy,
/// mass, distance, and CO2
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    conversions: HashMap<(String, String), UnitConversion>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        let mut registry = UnitRegistry {
            conversions: HashMap::new(),
        };

        let defaults: &[(&str, &str, f64)] = &[
            // Energy
            ("J", "kWh", 1.0 / 3.6e6),
            ("kWh", "J", 3.6e6),
            ("MJ", "J", 1e6),
            ("J", "MJ", 1e-6),
            ("MJ", "kWh", 1.0 / 3.6),
            ("kWh", "MJ", 3.6),
            // Mass
            ("kg", "t", 1e-3),
            ("t", "kg", 1e3),
            ("g", "kg", 1e-3),
            ("kg", "g", 1e3),
            // Distance
            ("m", "km", 1e-3),
            ("km", "m", 1e3),
            // CO2
            ("kg-CO2", "t-CO2", 1e-3),
            ("t-CO2", "kg-CO2", 1e3),
        ];
        for (from, to, factor) in defaults {
            registry.register(from, to, *factor);
        }

        registry
    }

    /// Register a directed conversion edge
    pub fn register(&mut self, from_unit: &str, to_unit: &str, factor: f64) {
        self.conversions.insert(
            (from_unit.to_string(), to_unit.to_string()),
            UnitConversion {
                from_unit: from_unit.to_string(),
                to_unit: to_unit.to_string(),
                factor,
            },
        );
    }

    /// True iff the units are equal or a direct edge exists
    pub fn can_convert(&self, from_unit: &str, to_unit: &str) -> bool {
        from_unit == to_unit
            || self
                .conversions
                .contains_key(&(from_unit.to_string(), to_unit.to_string()))
    }

    /// Look up a conversion; identity is always available
    pub fn get_conversion(&self, from_unit: &str, to_unit: &str) -> Option<UnitConversion> {
        if from_unit == to_unit {
            return Some(UnitConversion {
                from_unit: from_unit.to_string(),
                to_unit: to_unit.to_string(),
                factor: 1.0,
            });
        }
        self.conversions
            .get(&(from_unit.to_string(), to_unit.to_string()))
            .cloned()
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
