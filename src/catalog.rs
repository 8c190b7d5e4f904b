//! # Catalog
//!
//! The declarative repertoire: base types, product types, and typed
//! functions, with precomputed codomain/domain indices for the synthesis
//! engine. Append-only during construction, read-only during synthesis.

use crate::error::{CatalogError, CatalogResult};
use crate::model::{FuncDef, ProductType, TypeDef};
use crate::units::UnitRegistry;
use std::collections::HashMap;

/// Tagged view over a looked-up type name
#[derive(Debug, Clone, PartialEq)]
pub enum TypeEntry<'a> {
    Base(&'a TypeDef),
    Product(&'a ProductType),
}

/// Catalog of types, product types, and functions
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: HashMap<String, TypeDef>,
    product_types: HashMap<String, ProductType>,
    funcs: Vec<FuncDef>,
    /// codomain name -> indices into `funcs`, in insertion order
    by_cod: HashMap<String, Vec<usize>>,
    /// domain name -> indices into `funcs`; multi-arg functions are indexed
    /// under each argument type
    by_dom: HashMap<String, Vec<usize>>,
    units: UnitRegistry,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            types: HashMap::new(),
            product_types: HashMap::new(),
            funcs: Vec::new(),
            by_cod: HashMap::new(),
            by_dom: HashMap::new(),
            units: UnitRegistry::new(),
        }
    }

    /// Register a base type. Replacing an existing name is forbidden.
    pub fn add_type(&mut self, type_def: TypeDef) -> CatalogResult<()> {
        if self.types.contains_key(&type_def.name) || self.product_types.contains_key(&type_def.name)
        {
            return Err(CatalogError::Duplicate(type_def.name));
        }
        self.types.insert(type_def.name.clone(), type_def);
        Ok(())
    }

    /// Register a product type. Component names may be forward references;
    /// they are only resolved when a consumer asks for them.
    pub fn add_product_type(&mut self, product: ProductType) -> CatalogResult<()> {
        if self.types.contains_key(&product.name) || self.product_types.contains_key(&product.name)
        {
            return Err(CatalogError::Duplicate(product.name));
        }
        self.product_types.insert(product.name.clone(), product);
        Ok(())
    }

    /// Register a function and index it by codomain and by each domain type
    pub fn add_func(&mut self, func: FuncDef) -> CatalogResult<()> {
        if self.funcs.iter().any(|f| f.id == func.id) {
            return Err(CatalogError::Duplicate(func.id));
        }

        let index = self.funcs.len();
        self.by_cod.entry(func.cod.clone()).or_default().push(index);
        for dom_type in func.dom_types() {
            self.by_dom.entry(dom_type.clone()).or_default().push(index);
        }
        self.funcs.push(func);
        Ok(())
    }

    /// Functions whose codomain is `type_name`, in insertion order
    pub fn funcs_returning(&self, type_name: &str) -> Vec<&FuncDef> {
        self.by_cod
            .get(type_name)
            .map(|indices| indices.iter().map(|&i| &self.funcs[i]).collect())
            .unwrap_or_default()
    }

    /// Functions accepting `type_name` in any argument position, in
    /// insertion order
    pub fn funcs_accepting(&self, type_name: &str) -> Vec<&FuncDef> {
        self.by_dom
            .get(type_name)
            .map(|indices| indices.iter().map(|&i| &self.funcs[i]).collect())
            .unwrap_or_default()
    }

    /// All registered functions, in insertion order
    pub fn funcs(&self) -> &[FuncDef] {
        &self.funcs
    }

    pub fn get_func(&self, id: &str) -> Option<&FuncDef> {
        self.funcs.iter().find(|f| f.id == id)
    }

    /// Look up a name as either a base or a product type
    pub fn get_type(&self, name: &str) -> Option<TypeEntry<'_>> {
        if let Some(base) = self.types.get(name) {
            return Some(TypeEntry::Base(base));
        }
        self.product_types.get(name).map(TypeEntry::Product)
    }

    /// Like `get_type` but failing with `UnknownType`
    pub fn require_type(&self, name: &str) -> CatalogResult<TypeEntry<'_>> {
        self.get_type(name)
            .ok_or_else(|| CatalogError::UnknownType(name.to_string()))
    }

    pub fn is_product_type(&self, name: &str) -> bool {
        self.product_types.contains_key(name)
    }

    pub fn get_product_type(&self, name: &str) -> Option<&ProductType> {
        self.product_types.get(name)
    }

    /// Unit symbol declared on a base type, if any
    pub fn get_unit(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).and_then(TypeDef::unit)
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitRegistry {
        &mut self.units
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn product_type_names(&self) -> impl Iterator<Item = &str> {
        self.product_types.keys().map(String::as_str)
    }

    /// Product types in a deterministic (name-sorted) order, for strategy
    /// enumeration
    pub fn product_types_ordered(&self) -> Vec<&ProductType> {
        let mut products: Vec<&ProductType> = self.product_types.values().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        products
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn product_type_count(&self) -> usize {
        self.product_types.len()
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }
}
