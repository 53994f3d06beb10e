pub mod bill;
pub mod notification;
pub mod reading;

pub use bill::{Bill, BillWithReading};
pub use notification::{NotificationRecord, PushUser};
pub use reading::{ConsumptionSample, MeterReading};
