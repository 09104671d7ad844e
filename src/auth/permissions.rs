use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::gateway::ModelTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnDashboard,
    EnrollInCourses,
    ChatWithTutor,

    CreateCourses,
    EditCourses,
    RecordCheckpoints,
    ViewCourseOverview,
    RegisterUsers,

    EditUserRoles,
    EditUserCredentials,
    ViewLoginActivity,

    UseAdvancedModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Role {
    Student,
    Teacher,
    Admin,
    Gpt4Privileged,
}

static STUDENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnDashboard);
    permissions.insert(Permission::EnrollInCourses);
    permissions.insert(Permission::ChatWithTutor);

    permissions
});

static GPT4_PRIVILEGED_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(STUDENT_PERMISSIONS.iter().copied());

    permissions.insert(Permission::UseAdvancedModel);

    permissions
});

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(STUDENT_PERMISSIONS.iter().copied());

    permissions.insert(Permission::CreateCourses);
    permissions.insert(Permission::EditCourses);
    permissions.insert(Permission::RecordCheckpoints);
    permissions.insert(Permission::ViewCourseOverview);
    permissions.insert(Permission::RegisterUsers);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(TEACHER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::EditUserRoles);
    permissions.insert(Permission::EditUserCredentials);
    permissions.insert(Permission::ViewLoginActivity);
    permissions.insert(Permission::UseAdvancedModel);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Student => &STUDENT_PERMISSIONS,
            Role::Teacher => &TEACHER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
            Role::Gpt4Privileged => &GPT4_PRIVILEGED_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Which completion model this role is entitled to. Re-evaluated at the
    /// start of every chat turn, so role changes apply from the next turn on.
    pub fn model_tier(&self) -> ModelTier {
        if self.has_permission(Permission::UseAdvancedModel) {
            ModelTier::Advanced
        } else {
            ModelTier::Standard
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Gpt4Privileged => "gpt4_privileged",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            "gpt4_privileged" => Ok(Role::Gpt4Privileged),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
