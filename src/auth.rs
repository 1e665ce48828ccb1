use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        };
        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid role", s)),
        }
    }
}

/// An authenticated caller: the user row id plus its role.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

/// The closed set of gated operations. Adding a role or an operation forces
/// every arm of the rule table below to be revisited.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Create, delete, or list users.
    ManageUsers,
    /// Create, update, or delete a grade.
    WriteGrade,
    /// Read any group's raw grades or aggregate report.
    ReadGroupReport,
    /// A student reading its own report; carries the user id being read.
    ReadOwnGrades { user_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AuthDenied {
    Unauthenticated,
    Forbidden,
}

/// The authorization gate. Never returns empty data in place of a denial;
/// callers surface the denial as its own error code.
pub fn authorize(identity: Option<&Identity>, operation: &Operation) -> Result<(), AuthDenied> {
    let Some(identity) = identity else {
        return Err(AuthDenied::Unauthenticated);
    };

    let allowed = match operation {
        Operation::ManageUsers => matches!(identity.role, Role::Admin),
        Operation::WriteGrade | Operation::ReadGroupReport => {
            matches!(identity.role, Role::Admin | Role::Teacher)
        }
        Operation::ReadOwnGrades { user_id } => {
            matches!(identity.role, Role::Student) && identity.user_id == *user_id
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthDenied::Forbidden)
    }
}

/// One-way credential digest. The scheme is deliberately opaque to the rest
/// of the daemon: everything else only ever compares digests.
pub fn credential_hash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_credential(password: &str, stored_hash: &str) -> bool {
    credential_hash(password) == stored_hash
}
