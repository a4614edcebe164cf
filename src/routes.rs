use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::Key;

const DEFAULT_ROUTES: &str = include_str!("../assets/routes.json");

#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("map order is empty")]
    EmptyMapOrder,

    #[error("map {0} appears more than once in the map order")]
    DuplicateMap(String),

    #[error("no route from {from} to {to} (expected key {name})")]
    MissingRoute { from: String, to: String, name: String },

    #[error("route {0} has no keys")]
    EmptyRoute(String),

    #[error("starting map {0} is not in the map order")]
    UnknownStartingMap(String),
}

/// On-disk route table.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteTable {
    pub starting_map: String,
    pub map_order: Vec<String>,
    pub routes: HashMap<String, Vec<Key>>,
}

impl RouteTable {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse route table")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid route table {}", path.display()))
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_ROUTES)
    }
}

/// Name of the route between two adjacent maps.
pub fn route_name(from: &str, to: &str) -> String {
    format!("{from}_TO_{to}")
}

/// Directed cycle of maps; each edge carries the keys that walk it.
///
/// Construction guarantees every consecutive pair of the map order
/// (including last → first) has a non-empty route.
#[derive(Debug, Clone)]
pub struct RouteGraph {
    order: Vec<String>,
    starting_map: String,
    routes: HashMap<String, Vec<Key>>,
}

#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub name: String,
    pub keys: usize,
}

impl RouteGraph {
    pub fn from_table(table: RouteTable) -> Result<Self, RouteError> {
        if table.map_order.is_empty() {
            return Err(RouteError::EmptyMapOrder);
        }

        let mut seen = HashSet::new();
        for map in &table.map_order {
            if !seen.insert(map.as_str()) {
                return Err(RouteError::DuplicateMap(map.clone()));
            }
        }

        let n = table.map_order.len();
        for i in 0..n {
            let from = &table.map_order[i];
            let to = &table.map_order[(i + 1) % n];
            let name = route_name(from, to);
            match table.routes.get(&name) {
                None => {
                    return Err(RouteError::MissingRoute {
                        from: from.clone(),
                        to: to.clone(),
                        name,
                    });
                }
                Some(keys) if keys.is_empty() => return Err(RouteError::EmptyRoute(name)),
                Some(_) => {}
            }
        }

        let cycle_routes: HashSet<String> = (0..n)
            .map(|i| route_name(&table.map_order[i], &table.map_order[(i + 1) % n]))
            .collect();
        let unused: Vec<&String> = table
            .routes
            .keys()
            .filter(|name| !cycle_routes.contains(*name))
            .collect();
        if !unused.is_empty() {
            tracing::warn!("route table has routes outside the cycle: {unused:?}");
        }

        let graph = Self {
            order: table.map_order,
            starting_map: table.starting_map,
            routes: table.routes,
        };
        graph.index_of(&graph.starting_map)?;
        Ok(graph)
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn starting_map(&self) -> &str {
        &self.starting_map
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn index_of(&self, map: &str) -> Result<usize, RouteError> {
        self.order
            .iter()
            .position(|m| m == map)
            .ok_or_else(|| RouteError::UnknownStartingMap(map.to_string()))
    }

    pub fn map_at(&self, index: usize) -> &str {
        &self.order[index % self.order.len()]
    }

    /// Index of the map after `index` in the cycle.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.order.len()
    }

    pub fn route(&self, name: &str) -> Option<&[Key]> {
        self.routes.get(name).map(Vec::as_slice)
    }

    /// Routes in cycle order.
    pub fn summary(&self) -> Vec<RouteSummary> {
        (0..self.order.len())
            .map(|i| {
                let name = route_name(self.map_at(i), self.map_at(self.next_index(i)));
                let keys = self.route(&name).map_or(0, <[Key]>::len);
                RouteSummary { name, keys }
            })
            .collect()
    }
}
