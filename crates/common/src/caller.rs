//! Caller identity handed in by the authentication layer.

use serde::{Deserialize, Serialize};

use crate::CustomerId;

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A shopper acting on their own orders.
    #[default]
    Customer,

    /// Back-office or payment callback acting on any order.
    Operator,
}

impl Role {
    /// Returns the role name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Operator => "operator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "operator" => Ok(Role::Operator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub customer_id: CustomerId,
    pub role: Role,
}

impl Caller {
    /// Creates a customer caller.
    pub fn customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            role: Role::Customer,
        }
    }

    /// Creates an operator caller.
    pub fn operator(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            role: Role::Operator,
        }
    }

    /// Returns true if the caller has operator rights.
    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    /// Returns true if the caller may act on a resource owned by `owner`.
    pub fn can_act_for(&self, owner: CustomerId) -> bool {
        self.is_operator() || self.customer_id == owner
    }
}
