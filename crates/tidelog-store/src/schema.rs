diesel::table! {
    history_entries (id) {
        id -> Integer,
        local_username -> Text,
        hostname -> Text,
        home_directory -> Text,
        command -> Text,
        current_working_directory -> Text,
        exit_code -> Integer,
        start_time -> BigInt,
        end_time -> BigInt,
        device_id -> Text,
        entry_id -> Text,
        custom_columns -> Text,
    }
}
