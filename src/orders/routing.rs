//! Routing keys used on the services exchange.

pub const ORDER_CREATE: &str = "order.create";
pub const ORDER_CREATE_MULTIPLE: &str = "order.create_multiple_orders";
pub const ORDER_UPDATE: &str = "order.update";
pub const ORDER_PENDING_USER_CREATED: &str = "order.pending_user_created";
pub const ORDER_FULFILL: &str = "order.fulfill";
pub const ORDER_FIND: &str = "order.find";
pub const RETURN_PENDING_NETSUITE_ORDER_ID: &str = "return.pending.netsuite_order_id_required";
pub const ORDER_SERVICE_STATUS: &str = "order.service_status";

/// Keys the order service listens on by default.
pub const SUBSCRIBED: [&str; 7] = [
    ORDER_CREATE,
    ORDER_CREATE_MULTIPLE,
    ORDER_UPDATE,
    ORDER_PENDING_USER_CREATED,
    ORDER_FULFILL,
    RETURN_PENDING_NETSUITE_ORDER_ID,
    ORDER_SERVICE_STATUS,
];
