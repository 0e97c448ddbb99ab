use std::fmt::Display;

/// A rule a model parameter must satisfy
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Strictly greater than zero
    Positive,
    /// Strictly below a limit derived from another parameter
    LessThan { bound: &'static str, limit: f64 },
    /// Strictly inside `(low, high)`
    OpenRange { low: f64, high: f64 },
    /// Inside `(low, high]`
    HalfOpenRange { low: f64, high: f64 },
    /// Integer no smaller than the given value
    AtLeast(i64),
    /// Integer drawn from a fixed set
    OneOf(&'static [i64]),
    /// Not NaN or infinite
    Finite,
}

impl Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Positive => write!(f, "must be greater than zero"),
            Constraint::LessThan { bound, limit } => {
                write!(f, "must be less than {bound} ({limit})")
            }
            Constraint::OpenRange { low, high } => {
                write!(f, "must lie strictly between {low} and {high}")
            }
            Constraint::HalfOpenRange { low, high } => {
                write!(f, "must be greater than {low} and at most {high}")
            }
            Constraint::AtLeast(min) => write!(f, "must be at least {min}"),
            Constraint::OneOf(values) => write!(f, "must be one of {values:?}"),
            Constraint::Finite => write!(f, "must be a finite number"),
        }
    }
}

/// A single violated rule
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub value: f64,
    pub constraint: Constraint,
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} {}", self.field, self.value, self.constraint)
    }
}

/// Every rule violated by a set of model parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, field: &'static str, value: f64, constraint: Constraint) {
        self.issues.push(ValidationIssue {
            field,
            value,
            constraint,
        });
    }

    /// Whether any issue names `field`
    pub fn mentions(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

#[derive(Debug)]
pub enum SlotPlateError {
    Validation(ValidationReport),
    Model(String),
    Mesher(String),
    Assembly(String),
    SingularSystem(String),
    PostProcessor(String),
    Export(String),
    Sweep {
        step: usize,
        value: f64,
        source: Box<SlotPlateError>,
    },
    Cancelled {
        completed: usize,
    },
    Worker(String),
}

impl Display for SlotPlateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            SlotPlateError::Validation(report) => ("Input", report.to_string()),
            SlotPlateError::Model(v) => ("Model file", v.clone()),
            SlotPlateError::Mesher(v) => ("Mesher", v.clone()),
            SlotPlateError::Assembly(v) => ("Assembly", v.clone()),
            SlotPlateError::SingularSystem(v) => ("Singular system", v.clone()),
            SlotPlateError::PostProcessor(v) => ("Post Processor", v.clone()),
            SlotPlateError::Export(v) => ("Export", v.clone()),
            SlotPlateError::Sweep {
                step,
                value,
                source,
            } => (
                "Sweep",
                format!("step {step} (value {value}) failed: {source}"),
            ),
            SlotPlateError::Cancelled { completed } => (
                "Sweep",
                format!("cancelled after {completed} completed steps"),
            ),
            SlotPlateError::Worker(v) => ("Worker", v.clone()),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for SlotPlateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SlotPlateError::Sweep { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
