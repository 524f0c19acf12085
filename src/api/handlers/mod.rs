mod admin;
mod storage;
mod users;

pub use admin::health;
pub use storage::{
    delete_object, download_object, list_objects, missing_blob_name, upload_object,
    UploadResponse,
};
pub use users::{
    create_user, delete_profile_picture, delete_user, get_user, list_user_files, list_users,
    upload_profile_picture, PROFILE_PICTURE_CATEGORY,
};
