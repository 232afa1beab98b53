//! Esquema Diesel de la tabla de auditoría. Reemplazable con `diesel print-schema`.

diesel::table! {
    audit_logs (id) {
        id -> BigInt,
        transaction -> Text,
        #[sql_name = "type"]
        type_ -> Text,
        primary_key -> Nullable<Text>,
        source -> Text,
        parent_source -> Nullable<Text>,
        original -> Nullable<Text>,
        changed -> Nullable<Text>,
        meta -> Nullable<Text>,
        created -> Timestamptz,
    }
}
