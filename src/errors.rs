use thiserror::Error;

/// Error type of all flash operations.
///
/// Every variant carries a stable numeric code ([`PhError::code`]) grouped
/// into categories: input (-101..), numeric (-201..), convergence (-301..),
/// physical (-401..), algorithm (-601..), system (-701..) and generic
/// (-901..). The codes are part of the ABI surfaced to host logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhError {
    // input validation errors
    #[error("invalid composition: {0}")]
    InvalidComposition(String),
    #[error("invalid pressure: {0} Pa outside [100, 1e8]")]
    InvalidPressure(f64),
    #[error("invalid temperature: {0} K")]
    InvalidTemperature(f64),
    #[error("invalid enthalpy specification: {0} J/mol outside [-1e7, 1e7]")]
    InvalidEnthalpy(f64),
    #[error("input out of range: {0}")]
    OutOfRange(String),

    // numerical errors
    #[error("division by zero in {0}")]
    DivisionByZero(String),
    #[error("invalid numerical result in {0}")]
    InvalidResult(String),
    #[error("singular matrix in {0}")]
    MatrixSingular(String),

    // convergence errors
    #[error("`{0}` did not converge within the maximum number of iterations")]
    MaxIterations(String),
    #[error("oscillating iterates in {0}")]
    Oscillation(String),
    #[error("stagnating iteration in {0}")]
    Stagnation(String),

    // physical validity errors
    #[error("negative composition in {0}")]
    NegativeComposition(String),
    #[error("invalid phase state: {0}")]
    InvalidPhase(String),
    #[error("iteration converged to the trivial solution")]
    TrivialSolution,
    #[error("physically impossible state: {0}")]
    ImpossibleState(String),
    #[error("fugacity balance violated by {0:e}")]
    FugacityImbalance(f64),

    // algorithm errors
    #[error("stability analysis failed: {0}")]
    TpdFailure(String),
    #[error("Rachford-Rice solve failed: {0}")]
    RachfordRice(String),
    #[error("Anderson acceleration failed: {0}")]
    AndersonFailure(String),
    #[error("line search failed: {0}")]
    LineSearchFailure(String),
    #[error("Newton update failed: {0}")]
    NewtonFailure(String),
    #[error("equation of state evaluation failed: {0}")]
    EosFailure(String),

    // configuration errors
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    // generic errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl PhError {
    /// Stable numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidComposition(_) => -102,
            Self::InvalidPressure(_) => -103,
            Self::InvalidTemperature(_) => -104,
            Self::InvalidEnthalpy(_) => -105,
            Self::OutOfRange(_) => -106,
            Self::DivisionByZero(_) => -203,
            Self::InvalidResult(_) => -204,
            Self::MatrixSingular(_) => -206,
            Self::MaxIterations(_) => -301,
            Self::Oscillation(_) => -303,
            Self::Stagnation(_) => -305,
            Self::NegativeComposition(_) => -401,
            Self::InvalidPhase(_) => -402,
            Self::TrivialSolution => -403,
            Self::ImpossibleState(_) => -404,
            Self::FugacityImbalance(_) => -406,
            Self::TpdFailure(_) => -601,
            Self::RachfordRice(_) => -602,
            Self::AndersonFailure(_) => -603,
            Self::LineSearchFailure(_) => -604,
            Self::NewtonFailure(_) => -605,
            Self::EosFailure(_) => -606,
            Self::ConfigInvalid(_) => -701,
            Self::Internal(_) => -902,
        }
    }

    /// Category of the error code.
    pub fn category(&self) -> &'static str {
        match self.code() {
            -199..=-100 => "input",
            -299..=-200 => "numerical",
            -399..=-300 => "convergence",
            -499..=-400 => "physical",
            -699..=-600 => "algorithm",
            -799..=-700 => "system",
            _ => "generic",
        }
    }

    /// Whether the driver is allowed to retry once with fallback options.
    ///
    /// Input, configuration and internal errors are fatal at the boundary;
    /// numeric, convergence, physical and algorithm errors are recoverable.
    pub fn recoverable(&self) -> bool {
        matches!(
            self.category(),
            "numerical" | "convergence" | "physical" | "algorithm"
        )
    }
}

/// Convenience type for `Result<T, PhError>`.
pub type FlashResult<T> = Result<T, PhError>;
