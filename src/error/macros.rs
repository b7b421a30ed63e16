//! # 错误处理宏

/// 快速创建配置错误的宏
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::AppError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AppError::config(format!($fmt, $($arg)*))
    };
}

/// 快速创建内部错误的宏
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::AppError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AppError::internal(format!($fmt, $($arg)*))
    };
}
