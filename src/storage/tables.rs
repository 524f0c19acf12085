use redb::TableDefinition;

/// User records: uuid -> User (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// File associations: user uuid -> msgpack Vec of UserFile
pub const USER_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("user_files");
