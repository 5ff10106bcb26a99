// Phase 6: Policy DSL - Type Definitions
//
// JSON decision tree format for LLM-editable policies.
// All types are designed to deserialize safely from JSON with validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// DECISION TREE DEFINITION
// ============================================================================

/// Complete decision tree definition
///
/// This is the root object deserialized from JSON policy files.
/// Phase 8.2: Extended to support three separate decision trees:
/// - payment_tree: Payment release decisions (Queue 1 → Queue 2)
/// - strategic_collateral_tree: Strategic collateral decisions (STEP 2.5)
/// - end_of_tick_collateral_tree: Reactive collateral cleanup (STEP 8)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeDef {
    /// Schema version (currently "1.0")
    pub version: String,

    /// Unique identifier for this policy
    pub policy_id: String,

    /// Optional human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Payment release decision tree (Queue 1 → Queue 2 decisions)
    /// Optional to allow collateral-only policies
    #[serde(default)]
    pub payment_tree: Option<TreeNode>,

    /// Strategic collateral decision tree (Layer 1, STEP 2.5)
    /// Runs before settlements, forward-looking, policy-based
    #[serde(default)]
    pub strategic_collateral_tree: Option<TreeNode>,

    /// End-of-tick collateral decision tree (Layer 2, STEP 8)
    /// Runs after settlements, reactive cleanup
    #[serde(default)]
    pub end_of_tick_collateral_tree: Option<TreeNode>,

    /// Bank-level decision tree (release budgets, counterparty focus)
    /// Evaluated once per agent per tick, independent of any single transaction
    #[serde(default)]
    pub bank_tree: Option<TreeNode>,

    /// Named parameters (thresholds, constants)
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

// ============================================================================
// TREE NODES
// ============================================================================

/// A node in the decision tree
///
/// Two variants:
/// - Condition: Evaluate expression, branch based on result
/// - Action: Terminal node that returns a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    /// Conditional branch node
    Condition {
        /// Unique node identifier
        node_id: String,

        /// Optional human-readable description
        #[serde(default)]
        description: String,

        /// Boolean expression to evaluate
        condition: Expression,

        /// Node to visit if condition is true
        on_true: Box<TreeNode>,

        /// Node to visit if condition is false
        on_false: Box<TreeNode>,
    },

    /// Terminal action node
    Action {
        /// Unique node identifier
        node_id: String,

        /// Action to take
        action: ActionType,

        /// Optional action parameters
        #[serde(default)]
        parameters: HashMap<String, ValueOrCompute>,
    },
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Boolean expression
///
/// Evaluates to true or false based on simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Expression {
    // Comparison operators
    /// Equal (with epsilon tolerance for floats)
    #[serde(rename = "==")]
    Equal { left: Value, right: Value },

    /// Not equal
    #[serde(rename = "!=")]
    NotEqual { left: Value, right: Value },

    /// Less than
    #[serde(rename = "<")]
    LessThan { left: Value, right: Value },

    /// Less than or equal
    #[serde(rename = "<=")]
    LessOrEqual { left: Value, right: Value },

    /// Greater than
    #[serde(rename = ">")]
    GreaterThan { left: Value, right: Value },

    /// Greater than or equal
    #[serde(rename = ">=")]
    GreaterOrEqual { left: Value, right: Value },

    // Logical operators
    /// Logical AND (short-circuit evaluation)
    #[serde(rename = "and")]
    And { conditions: Vec<Expression> },

    /// Logical OR (short-circuit evaluation)
    #[serde(rename = "or")]
    Or { conditions: Vec<Expression> },

    /// Logical NOT
    #[serde(rename = "not")]
    Not { condition: Box<Expression> },
}

// ============================================================================
// VALUES
// ============================================================================

/// A value in an expression
///
/// Can be a field reference, parameter, literal, or computed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Reference to a field in the evaluation context
    /// Examples: "balance", "amount", "ticks_to_deadline"
    Field { field: String },

    /// Reference to a named parameter
    /// Examples: "urgency_threshold", "liquidity_buffer"
    Param { param: String },

    /// Literal value (number, string, boolean)
    Literal { value: serde_json::Value },

    /// Computed value (arithmetic expression)
    Compute { compute: Box<Computation> },
}

/// A value or computation for action parameters
///
/// Similar to Value but used in action parameter contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueOrCompute {
    /// Direct literal value
    Direct { value: serde_json::Value },

    /// Field reference
    Field { field: String },

    /// Parameter reference
    Param { param: String },

    /// Computed value
    Compute { compute: Computation },
}

// ============================================================================
// COMPUTATIONS
// ============================================================================

/// Arithmetic computation
///
/// Evaluates to a numeric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Computation {
    // Binary operators
    /// Addition
    #[serde(rename = "+")]
    Add { left: Value, right: Value },

    /// Subtraction
    #[serde(rename = "-")]
    Subtract { left: Value, right: Value },

    /// Multiplication
    #[serde(rename = "*")]
    Multiply { left: Value, right: Value },

    /// Division (checked for divide-by-zero at runtime)
    #[serde(rename = "/")]
    Divide { left: Value, right: Value },

    // N-ary operators
    /// Maximum of multiple values
    #[serde(rename = "max")]
    Max { values: Vec<Value> },

    /// Minimum of multiple values
    #[serde(rename = "min")]
    Min { values: Vec<Value> },

    // Phase 2.3: Math Helper Functions (Policy Enhancements V2)
    /// Ceiling - round up to nearest integer
    #[serde(rename = "ceil")]
    Ceil { value: Value },

    /// Floor - round down to nearest integer
    #[serde(rename = "floor")]
    Floor { value: Value },

    /// Round - round to nearest integer
    #[serde(rename = "round")]
    Round { value: Value },

    /// Absolute value
    #[serde(rename = "abs")]
    Abs { value: Value },

    /// Clamp value to range [min, max]
    #[serde(rename = "clamp")]
    Clamp {
        value: Value,
        min: Value,
        max: Value,
    },

    /// Safe division - return default if denominator is zero or near-zero
    #[serde(rename = "div0")]
    SafeDiv {
        numerator: Value,
        denominator: Value,
        default: Value,
    },
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Action type for terminal nodes
///
/// Maps to ReleaseDecision variants in the policy system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActionType {
    /// Submit transaction in full to RTGS
    Release,

    /// Submit transaction using credit if needed
    ReleaseWithCredit,

    /// Split and pace transaction (Phase 5)
    PaceAndRelease,

    /// Split transaction into multiple parts (Phase 5)
    Split,

    /// Split with staggered release timing (Phase 3.1)
    StaggerSplit,

    /// Hold transaction in Queue 1 for later
    Hold,

    /// Drop transaction (expired or unviable)
    Drop,

    /// Reprioritize transaction (Phase 4: Overdue Handling)
    /// Change transaction priority without moving from Queue 1
    Reprioritize,

    // Phase 8: Collateral Management Actions
    /// Post collateral to increase available liquidity
    PostCollateral,

    /// Withdraw collateral to reduce opportunity costs
    WithdrawCollateral,

    /// Take no action on collateral (keep current level)
    HoldCollateral,

    /// Set a per-tick release budget cap (bank_tree only)
    SetReleaseBudget,

    /// Write a value into one of the agent's named state registers
    SetStateRegister,

    /// Explicitly take no action this tick
    NoOp,
}

// ============================================================================
// HELPER METHODS
// ============================================================================

impl TreeNode {
    /// Get the node ID
    pub fn node_id(&self) -> &str {
        match self {
            TreeNode::Condition { node_id, .. } => node_id,
            TreeNode::Action { node_id, .. } => node_id,
        }
    }

    /// Check if this is a condition node
    pub fn is_condition(&self) -> bool {
        matches!(self, TreeNode::Condition { .. })
    }

    /// Check if this is an action node
    pub fn is_action(&self) -> bool {
        matches!(self, TreeNode::Action { .. })
    }
}

// ============================================================================
// TESTS
// ============================================================================
