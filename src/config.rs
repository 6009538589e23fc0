//! Resolver configuration.
//!
//! Everything the resolution steps need to know about the surrounding
//! deployment is passed in explicitly through [`ResolverConfig`]: which
//! environment's tables to read, whether configuration anomalies are logged
//! as warnings, and the names of the master-data tables and columns.

use serde::{Deserialize, Serialize};

/// Environment variable holding the table-name environment qualifier.
pub const ENV_ENVIRONMENT: &str = "ROWMATCH_ENVIRONMENT";

/// Environment variable enabling verbose logging (`1`, `true`, `yes`).
pub const ENV_VERBOSE: &str = "ROWMATCH_VERBOSE";

/// Top-level configuration shared by every resolution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Prefix qualifying every reference table name (`<environment>_<table>`).
    pub environment: String,
    /// Emit warnings for normalised configuration anomalies.
    pub verbose_logging: bool,
    /// Names of external tables and columns.
    pub schema: SchemaNames,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            verbose_logging: false,
            schema: SchemaNames::default(),
        }
    }
}

impl ResolverConfig {
    /// Creates a configuration for the given environment.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Enables or disables verbose logging.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    /// Builds a configuration from `ROWMATCH_ENVIRONMENT` and
    /// `ROWMATCH_VERBOSE`, falling back to defaults for unset variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(env) = std::env::var(ENV_ENVIRONMENT) {
            let env = env.trim();
            if !env.is_empty() {
                config.environment = env.to_string();
            }
        }
        if let Ok(flag) = std::env::var(ENV_VERBOSE) {
            config.verbose_logging = parse_flag(&flag);
        }
        config
    }

    /// Qualifies a table name with the environment prefix.
    ///
    /// ```
    /// use rowmatch::ResolverConfig;
    ///
    /// assert_eq!(ResolverConfig::new("prod").qualify("contact"), "prod_contact");
    /// assert_eq!(ResolverConfig::new("").qualify("contact"), "contact");
    /// ```
    #[must_use]
    pub fn qualify(&self, table: &str) -> String {
        if self.environment.is_empty() {
            table.to_string()
        } else {
            format!("{}_{table}", self.environment)
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Table and column names of the master-data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaNames {
    /// Creation timestamp used to break multiple-match ties.
    pub recency_column: String,
    /// Primary key column of every entity table.
    pub entity_id_column: String,
    /// Record state column; `active_state` marks live rows.
    pub state_column: String,
    /// State value of a live row.
    pub active_state: i64,
    /// Optionset metadata table.
    pub optionset: OptionSetSchema,
    /// External-reference cross-reference table.
    pub external_reference: ExternalReferenceSchema,
    /// Type registry columns.
    pub typed_entity: TypedEntitySchema,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            recency_column: "createdon".to_string(),
            entity_id_column: "Id".to_string(),
            state_column: "statecode".to_string(),
            active_state: 0,
            optionset: OptionSetSchema::default(),
            external_reference: ExternalReferenceSchema::default(),
            typed_entity: TypedEntitySchema::default(),
        }
    }
}

/// Columns of the optionset metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionSetSchema {
    /// Unqualified table name.
    pub table: String,
    /// Entity an option belongs to.
    pub entity_column: String,
    /// Optionset name.
    pub name_column: String,
    /// Coded value.
    pub value_column: String,
    /// Human-readable label.
    pub label_column: String,
}

impl Default for OptionSetSchema {
    fn default() -> Self {
        Self {
            table: "GlobalOptionSetMetadata".to_string(),
            entity_column: "EntityName".to_string(),
            name_column: "OptionSetName".to_string(),
            value_column: "Option".to_string(),
            label_column: "LocalizedLabel".to_string(),
        }
    }
}

/// Columns of the external-reference cross-reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalReferenceSchema {
    /// Unqualified table name.
    pub table: String,
    /// External id held by the source system.
    pub external_id_column: String,
    /// Id of the linked record.
    pub target_id_column: String,
    /// Entity type of the linked record; also its table name.
    pub target_type_column: String,
    /// Source system name.
    pub data_source_column: String,
    /// Source system detail, matched against the rule's literal.
    pub data_source_detail_column: String,
}

impl Default for ExternalReferenceSchema {
    fn default() -> Self {
        Self {
            table: "py3_externalreference".to_string(),
            external_id_column: "py3_externalreference".to_string(),
            target_id_column: "regardingobjectid".to_string(),
            target_type_column: "regardingobjectid_entitytype".to_string(),
            data_source_column: "shl_datasource".to_string(),
            data_source_detail_column: "shl_datasourcedetail".to_string(),
        }
    }
}

/// Columns of the type registry entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedEntitySchema {
    /// Type name matched against the source column.
    pub name_column: String,
    /// Parent type id scope.
    pub parent_column: String,
    /// Optionset group id scope.
    pub group_column: String,
    /// Id copied to the output.
    pub type_id_column: String,
}

impl Default for TypedEntitySchema {
    fn default() -> Self {
        Self {
            name_column: "py3_name".to_string(),
            parent_column: "py3_parenttypeid".to_string(),
            group_column: "py3_optionsetgroupid".to_string(),
            type_id_column: "py3_typeid".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.environment, "dev");
        assert!(!config.verbose_logging);
        assert_eq!(config.schema.recency_column, "createdon");
        assert_eq!(config.schema.optionset.table, "GlobalOptionSetMetadata");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(ResolverConfig::new("test").qualify("account"), "test_account");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ResolverConfig = serde_json::from_str(
            r#"{"environment": "preprod", "schema": {"recency_column": "created_at"}}"#,
        )
        .unwrap();
        assert_eq!(config.environment, "preprod");
        assert_eq!(config.schema.recency_column, "created_at");
        assert_eq!(config.schema.entity_id_column, "Id");
        assert_eq!(config.schema.typed_entity.name_column, "py3_name");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nah"));
    }
}
