use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidYaml,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    RepositoryNotFound,
    RepositoryUrlInvalid,
    CredentialNotFound,
    CredentialKeyNotFound,
    CredentialInUse,
    ProfileNotFound,
    ProfileLimitReached,
    JobNotFound,
    JobProfileMissing,
    RunNotFound,

    GitCloneFailed,
    SshAgentFailed,
    ExecutionFailed,

    DatabaseError,
    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::RepositoryNotFound => "repository.not_found",
            ErrorCode::RepositoryUrlInvalid => "repository.url_invalid",
            ErrorCode::CredentialNotFound => "credential.not_found",
            ErrorCode::CredentialKeyNotFound => "credential.key_not_found",
            ErrorCode::CredentialInUse => "credential.in_use",
            ErrorCode::ProfileNotFound => "profile.not_found",
            ErrorCode::ProfileLimitReached => "profile.limit_reached",
            ErrorCode::JobNotFound => "job.not_found",
            ErrorCode::JobProfileMissing => "job.profile_missing",
            ErrorCode::RunNotFound => "run.not_found",

            ErrorCode::GitCloneFailed => "git.clone_failed",
            ErrorCode::SshAgentFailed => "ssh.agent_failed",
            ErrorCode::ExecutionFailed => "execution.failed",

            ErrorCode::DatabaseError => "internal.database_error",
            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// True for the codes that mean "the referenced entity does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ErrorCode::RepositoryNotFound
                | ErrorCode::CredentialNotFound
                | ErrorCode::CredentialKeyNotFound
                | ErrorCode::ProfileNotFound
                | ErrorCode::JobNotFound
                | ErrorCode::JobProfileMissing
                | ErrorCode::RunNotFound
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialKeyNotFoundDetails {
    pub credential_id: String,
    pub key_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCloneFailedDetails {
    pub url: String,
    pub destination: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::database(err.to_string(), None)
    }
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn repository_not_found(id: i64) -> Self {
        Self::not_found(ErrorCode::RepositoryNotFound, "Repository not found", id)
            .with_hint("Run 'dbtrun repo list' to see registered repositories")
    }

    pub fn credential_not_found(id: i64) -> Self {
        Self::not_found(ErrorCode::CredentialNotFound, "Credential not found", id)
            .with_hint("Run 'dbtrun credential list' to see available credentials")
    }

    pub fn profile_not_found(id: impl std::fmt::Display) -> Self {
        Self::not_found(ErrorCode::ProfileNotFound, "Profile not found", id)
            .with_hint("Run 'dbtrun profile list' to see stored profiles")
    }

    pub fn job_not_found(id: i64) -> Self {
        Self::not_found(ErrorCode::JobNotFound, "Scheduled job not found", id)
            .with_hint("Run 'dbtrun job list' to see scheduled jobs")
    }

    pub fn run_not_found(id: i64) -> Self {
        Self::not_found(ErrorCode::RunNotFound, "Run record not found", id)
    }

    pub fn job_profile_missing(job_id: i64) -> Self {
        Self::not_found(
            ErrorCode::JobProfileMissing,
            "No profile yml attached to this job",
            job_id,
        )
        .with_hint(format!(
            "Attach a profile with 'dbtrun job set {} --profile <id>'",
            job_id
        ))
    }

    fn not_found(code: ErrorCode, message: &str, id: impl std::fmt::Display) -> Self {
        Self::new(
            code,
            message,
            to_details(NotFoundDetails { id: id.to_string() }),
        )
    }

    pub fn credential_key_not_found(credential_id: i64, key_file: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CredentialKeyNotFound,
            "Public key not found",
            to_details(CredentialKeyNotFoundDetails {
                credential_id: credential_id.to_string(),
                key_file: key_file.into(),
            }),
        )
    }

    pub fn credential_in_use(credential_id: i64, repository_id: i64) -> Self {
        Self::new(
            ErrorCode::CredentialInUse,
            format!(
                "Credential is used by repository '{}'. Delete or re-point the repository first.",
                repository_id
            ),
            serde_json::json!({
                "credentialId": credential_id.to_string(),
                "repositoryId": repository_id.to_string(),
            }),
        )
    }

    pub fn repository_url_invalid(url: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::RepositoryUrlInvalid,
            problem.clone(),
            to_details(ConfigInvalidValueDetails {
                key: "url".to_string(),
                value: Some(url.into()),
                problem,
            }),
        )
    }

    pub fn profile_limit_reached(limit: usize) -> Self {
        Self::new(
            ErrorCode::ProfileLimitReached,
            format!("At most {} profiles can exist", limit),
            serde_json::json!({ "limit": limit }),
        )
        .with_hint("Update an existing profile with 'dbtrun profile set <name>'")
    }

    pub fn config_invalid_yaml(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            "Invalid YAML",
            serde_json::json!({
                "error": error.into(),
                "context": context,
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({
                "path": path.into(),
                "error": err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn git_clone_failed(details: GitCloneFailedDetails) -> Self {
        let message = format!("Error creating repo: {}", details.stderr.trim());
        Self::new(ErrorCode::GitCloneFailed, message, to_details(details))
    }

    pub fn ssh_agent_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SshAgentFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
        .with_retryable(true)
    }

    pub fn execution_failed(details: ExecutionFailedDetails) -> Self {
        let message = details.error.clone();
        Self::new(ErrorCode::ExecutionFailed, message, to_details(details))
    }

    pub fn database(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::DatabaseError,
            format!("Database error: {}", error),
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("IO error ({}): {}", ctx, error),
            None => format!("IO error: {}", error),
        };
        Self::new(
            ErrorCode::InternalIoError,
            message,
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            format!("Unexpected error: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes_are_flagged() {
        assert!(Error::job_not_found(3).code.is_not_found());
        assert!(Error::credential_key_not_found(1, "/tmp/x.pub").code.is_not_found());
        assert!(!Error::ssh_agent_failed("boom").code.is_not_found());
        assert_eq!(Error::ssh_agent_failed("boom").retryable, Some(true));
    }

    #[test]
    fn clone_failure_message_carries_stderr() {
        let err = Error::git_clone_failed(GitCloneFailedDetails {
            url: "git@github.com:acme/analytics.git".to_string(),
            destination: "/srv/external-repo-4".to_string(),
            stderr: "fatal: repository not found\n".to_string(),
        });

        assert_eq!(err.code.as_str(), "git.clone_failed");
        assert_eq!(err.message, "Error creating repo: fatal: repository not found");
        assert_eq!(err.details["destination"], "/srv/external-repo-4");
    }

    #[test]
    fn invalid_argument_uses_problem_as_message() {
        let err = Error::validation_invalid_argument(
            "command",
            "Command must start with dbt",
            None,
            None,
        );
        assert_eq!(err.message, "Command must start with dbt");
        assert_eq!(err.details["field"], "command");
    }
}
