//! Instruction templates for per-file data-sink analysis.
//!
//! The templates are fixed strings with two substitution points (file path and
//! file content). The answer schema is a shared constant so the prompt and the
//! response parser cannot drift apart.

/// JSON key the model must place the sink list under. The parser reads the
/// same constant.
pub const SERVICES_KEY: &str = "detected_data_sink_services";

/// Answer schema embedded verbatim in every prompt (schema v1; bump together
/// with the parser if the record shape ever changes).
pub const ANSWER_SCHEMA: &str = r#"{
    "detected_data_sink_services": [
        {
            "service": "[short and relevant service/component name]",
            "evidence": "[the exact code snippet showing the sink operation]",
            "reasoning": "[explanation of why this is a data sink]"
        },
        {
            "service": "[short and relevant service/component name]",
            "evidence": "[the exact code snippet showing the sink operation]",
            "reasoning": "[explanation of why this is a data sink]"
        },
        ...
    ]
}"#;

const BASE_INSTRUCTIONS: &str = r#"Instructions:
- In the given code file, identify all services acting as data sinks. A data sink is defined as any service/component that receives and stores/transmits data from the application (e.g., databases, APIs, external systems, logging services, file systems, etc.).
- A service can be a database, API, external system, logging service, file system, etc.
- Output the name of the service that's acting as a data sink."#;

const STRICT_INSTRUCTIONS: &str = r#"Instructions:
- In the given code file, identify all services acting as data sinks. A data sink is defined as any service/component that receives and stores/transmits data from the application. Focus on extracting the **service name** as used in the code, not the underlying sink's or product's name (e.g., instead of "database", look for the specific service/component name like "userDBService").
- A service can be a database, API, external system, logging service, file system, etc.
- Output the name of the service that's acting as a data sink.

Note: Focus on extracting the service name as it appears in the code (e.g., "loggingService", "fileStorage", etc.), AND NOT the underlying sink's name (e.g., "Redis", "RabbitMQ", "Upstash", "AWS S3 Object Storage", "PostgreSQL Database", etc.)."#;

/// Worked example pair for the strict variant: input snippet plus the answer
/// the model is expected to produce for it.
const STRICT_EXAMPLE: &str = r#"Example:

If the code contains:

```typescript
export const seedUserWorkspaces = async (
  workspaceDataSource: DataSource,
  schemaName: string,
  workspaceId: string,
) => {
  await workspaceDataSource
    .createQueryBuilder()
    .insert()
    .into(`${schemaName}.${tableName}`, ['id', 'userId', 'workspaceId'])
    .orIgnore()
    .values([
      {
        id: DEV_SEED_USER_WORKSPACE_IDS.NOAH,
        userId: DEMO_SEED_USER_IDS.NOAH,
        workspaceId: workspaceId,
      },
    ])
    .execute();
};

export const deleteUserWorkspaces = async (
  workspaceDataSource: DataSource,
  schemaName: string,
  workspaceId: string,
) => {
  await workspaceDataSource
    .createQueryBuilder()
    .delete()
    .from(`${schemaName}.${tableName}`)
    .where(`"${tableName}"."workspaceId" = :workspaceId`, {
      workspaceId,
    })
    .execute();
};
```

The output should be:

{
    "detected_data_sink_services": [
        {
            "service": "workspaceDataSource",
            "evidence": "await workspaceDataSource\n    .createQueryBuilder()\n    .insert()\n    .into(`${schemaName}.${tableName}`, ['id', 'userId', 'workspaceId'])\n    .orIgnore()\n    .values([...])\n    .execute();",
            "reasoning": "The service 'workspaceDataSource' is used to insert data into a table, indicating it is acting as a data sink."
        },
        {
            "service": "workspaceDataSource",
            "evidence": "await workspaceDataSource\n    .createQueryBuilder()\n    .delete()\n    .from(`${schemaName}.${tableName}`)\n    .where(`\"${tableName}\".\"workspaceId\" = :workspaceId`, {\n      workspaceId,\n    })\n    .execute();",
            "reasoning": "The service 'workspaceDataSource' is used to delete data from a table, indicating it is acting as a data sink."
        }
    ]
}"#;

/// Which instruction set to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptVariant {
    /// Report any reasonable service/component name.
    #[default]
    Base,
    /// Demand the service identifier as named in code, with a worked example.
    StrictNaming,
}

/// Render the analysis prompt for one file. Pure string assembly; the only
/// way this can go wrong is an out-of-sync schema constant, which is guarded
/// by tests rather than a runtime check.
pub fn render(variant: PromptVariant, file_path: &str, file_content: &str) -> String {
    let mut prompt = String::with_capacity(
        file_content.len() + ANSWER_SCHEMA.len() + 1024,
    );

    match variant {
        PromptVariant::Base => {
            prompt.push_str(BASE_INSTRUCTIONS);
            prompt.push_str("\n\n---\n\n");
            prompt.push_str(
                "Provide your answer in this JSON format without any additional text or backticks:\n\n",
            );
            prompt.push_str(ANSWER_SCHEMA);
        }
        PromptVariant::StrictNaming => {
            prompt.push_str(STRICT_INSTRUCTIONS);
            prompt.push_str("\n\n---\n\nJSON Output Format:\n\n");
            prompt.push_str(ANSWER_SCHEMA);
            prompt.push_str("\n\n---\n\n");
            prompt.push_str(STRICT_EXAMPLE);
        }
    }

    prompt.push_str("\n\n---\n\nFile path:\n");
    prompt.push_str(file_path);
    prompt.push_str("\n\n---\n\nFile content:\n```\n");
    prompt.push_str(file_content);
    prompt.push_str("\n```\n");
    prompt
}
