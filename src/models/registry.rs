//! Named-object store for one tag-and-probe bin.
//!
//! The registry owns the observable, the datasets, every parameter, shape and
//! model. Shapes and models refer to each other through typed index handles
//! (`ParamId`, `ShapeId`, ...), never through copies, so changing a parameter
//! is seen by every shape that uses it. That sharing is what ties the fail
//! width to the pass width.

use std::collections::HashMap;

use crate::domain::{Histogram, Observable, Parameter};
use crate::error::{CompositionError, FitError};
use crate::models::model::Model;
use crate::models::shape::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(pub(crate) usize);

impl ParamId {
    /// Position of the parameter in [`Registry::values`].
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a registered name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Observable,
    Parameter(ParamId),
    Histogram(HistId),
    Shape(ShapeId),
    Model(ModelId),
}

impl Entry {
    pub fn kind_name(self) -> &'static str {
        match self {
            Entry::Observable => "observable",
            Entry::Parameter(_) => "parameter",
            Entry::Histogram(_) => "histogram",
            Entry::Shape(_) => "shape",
            Entry::Model(_) => "model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    observable: Observable,
    params: Vec<Parameter>,
    histograms: Vec<(String, Histogram)>,
    shapes: Vec<Shape>,
    models: Vec<Model>,
    names: HashMap<String, Entry>,
}

impl Registry {
    pub fn new(observable: Observable) -> Self {
        let mut names = HashMap::new();
        names.insert(observable.name.clone(), Entry::Observable);
        Self {
            observable,
            params: Vec::new(),
            histograms: Vec::new(),
            shapes: Vec::new(),
            models: Vec::new(),
            names,
        }
    }

    pub fn observable(&self) -> &Observable {
        &self.observable
    }

    pub fn observable_mut(&mut self) -> &mut Observable {
        &mut self.observable
    }

    pub fn lookup(&self, name: &str) -> Option<Entry> {
        self.names.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    fn claim(&mut self, name: &str, entry: Entry) -> Result<(), CompositionError> {
        if self.names.contains_key(name) {
            return Err(CompositionError::Duplicate(name.to_string()));
        }
        self.names.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn add_parameter(&mut self, param: Parameter) -> Result<ParamId, CompositionError> {
        let id = ParamId(self.params.len());
        self.claim(&param.name, Entry::Parameter(id))?;
        self.params.push(param);
        Ok(id)
    }

    pub fn add_histogram(&mut self, name: &str, hist: Histogram) -> Result<HistId, FitError> {
        hist.validate(name)?;
        let id = HistId(self.histograms.len());
        self.claim(name, Entry::Histogram(id))?;
        self.histograms.push((name.to_string(), hist));
        Ok(id)
    }

    pub fn add_shape(&mut self, shape: Shape) -> Result<ShapeId, CompositionError> {
        let id = ShapeId(self.shapes.len());
        self.claim(&shape.name, Entry::Shape(id))?;
        self.shapes.push(shape);
        Ok(id)
    }

    pub fn add_model(&mut self, model: Model) -> Result<ModelId, CompositionError> {
        let id = ModelId(self.models.len());
        self.claim(&model.name, Entry::Model(id))?;
        self.models.push(model);
        Ok(id)
    }

    pub fn param_id(&self, name: &str) -> Option<ParamId> {
        match self.lookup(name)? {
            Entry::Parameter(id) => Some(id),
            _ => None,
        }
    }

    /// Parameter by name; `None` is a normal answer, not an error.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.param_id(name).map(|id| &self.params[id.0])
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        let id = self.param_id(name)?;
        Some(&mut self.params[id.0])
    }

    pub fn require_param(&self, name: &str) -> Result<ParamId, CompositionError> {
        match self.require(name)? {
            Entry::Parameter(id) => Ok(id),
            other => Err(wrong_kind(name, "parameter", other)),
        }
    }

    pub fn require_shape(&self, name: &str) -> Result<ShapeId, CompositionError> {
        match self.require(name)? {
            Entry::Shape(id) => Ok(id),
            other => Err(wrong_kind(name, "shape", other)),
        }
    }

    pub fn require_histogram(&self, name: &str) -> Result<HistId, CompositionError> {
        match self.require(name)? {
            Entry::Histogram(id) => Ok(id),
            other => Err(wrong_kind(name, "histogram", other)),
        }
    }

    fn require(&self, name: &str) -> Result<Entry, CompositionError> {
        self.lookup(name)
            .ok_or_else(|| CompositionError::Undefined(name.to_string()))
    }

    pub fn parameter(&self, id: ParamId) -> &Parameter {
        &self.params[id.0]
    }

    pub fn parameter_mut(&mut self, id: ParamId) -> &mut Parameter {
        &mut self.params[id.0]
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn histogram(&self, id: HistId) -> &Histogram {
        &self.histograms[id.0].1
    }

    pub fn shape(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.0]
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    /// Current value of every parameter, indexed by `ParamId::index`.
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value()).collect()
    }

    /// Parameters a shape depends on, following convolutions.
    pub fn shape_parameters(&self, id: ShapeId, out: &mut Vec<ParamId>) {
        let kind = &self.shape(id).kind;
        out.extend(kind.parameters());
        for child in kind.children() {
            self.shape_parameters(child, out);
        }
    }

    /// Every parameter a model depends on, de-duplicated and sorted by name.
    pub fn model_parameters(&self, id: ModelId) -> Vec<ParamId> {
        let mut out = Vec::new();
        for component in &self.model(id).components {
            out.extend(component.coefficient.parameters());
            self.shape_parameters(component.shape, &mut out);
        }
        out.sort();
        out.dedup();
        out.sort_by(|a, b| self.params[a.0].name.cmp(&self.params[b.0].name));
        out
    }
}

fn wrong_kind(name: &str, expected: &'static str, found: Entry) -> CompositionError {
    CompositionError::WrongKind {
        name: name.to_string(),
        expected,
        found: found.kind_name(),
    }
}
