use serde::{Deserialize, Serialize};

use crate::error::ProgramError;

/// Closed set of program roles carried by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    PartnerManager,
    L1Approver,
    L2Approver,
    Finance,
    Partner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::PartnerManager => "partner_manager",
            Self::L1Approver => "l1_approver",
            Self::L2Approver => "l2_approver",
            Self::Finance => "finance",
            Self::Partner => "partner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "partner_manager" => Some(Self::PartnerManager),
            "l1_approver" => Some(Self::L1Approver),
            "l2_approver" => Some(Self::L2Approver),
            "finance" => Some(Self::Finance),
            "partner" => Some(Self::Partner),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub actor_id: String,
    pub roles: Vec<Role>,
}

impl Principal {
    /// Construct from validated JWT claims at the server boundary.
    /// Role strings outside the program catalogue are dropped.
    pub fn from_jwt_claims(claims: &JwtClaims) -> Result<Self, ProgramError> {
        let actor_id = claims
            .sub
            .clone()
            .ok_or_else(|| ProgramError::Forbidden("missing sub claim".into()))?;
        let roles = claims
            .roles
            .iter()
            .flatten()
            .filter_map(|r| Role::parse(r))
            .collect();
        Ok(Self { actor_id, roles })
    }

    /// Construct explicitly for in-process callers and tests.
    pub fn in_process(actor_id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any(&self, allowed: &[Role]) -> bool {
        allowed.iter().any(|r| self.has_role(*r))
    }

    /// Fails with `Forbidden` unless the caller holds one of `allowed`.
    pub fn require_any(&self, allowed: &[Role], action: &str) -> Result<(), ProgramError> {
        if self.has_any(allowed) {
            Ok(())
        } else {
            Err(ProgramError::Forbidden(format!(
                "{} may not {}",
                self.actor_id, action
            )))
        }
    }
}

/// JWT claims shape expected from the identity provider.
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub sub: Option<String>,
    pub roles: Option<Vec<String>>,
}
