// 領域層：影像與偵測模型，以及核心使用的 ports (traits)

pub mod model;
pub mod ports;
