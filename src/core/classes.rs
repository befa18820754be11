use crate::utils::error::{DetError, Result};

pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane", "bicycle", "bird", "boat", "bottle", "bus", "car", "cat", "chair", "cow",
    "diningtable", "dog", "horse", "motorbike", "person", "pottedplant", "sheep", "sofa",
    "train", "tvmonitor",
];

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic_light", "fire_hydrant", "stop_sign", "parking_meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports_ball",
    "kite", "baseball_bat", "baseball_glove", "skateboard", "surfboard", "tennis_racket",
    "bottle", "wine_glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot_dog", "pizza", "donut", "cake", "chair",
    "couch", "potted_plant", "bed", "dining_table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell_phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy_bear", "hair_drier",
    "toothbrush",
];

/// 依資料集名稱 (或別名) 取得類別名稱
pub fn get_classes(dataset: &str) -> Result<Vec<String>> {
    let names: &[&str] = match dataset.to_ascii_lowercase().as_str() {
        "voc" | "pascal_voc" | "voc07" | "voc12" => &VOC_CLASSES,
        "coco" | "mscoco" | "ms_coco" => &COCO_CLASSES,
        other => {
            return Err(DetError::InvalidConfigValueError {
                field: "dataset".to_string(),
                value: other.to_string(),
                reason: "Unrecognized dataset, expected voc or coco".to_string(),
            })
        }
    };
    Ok(names.iter().map(|name| name.to_string()).collect())
}

/// 解析 checkpoint metadata 的 `CLASSES`：JSON 陣列或逗號分隔字串
pub fn parse_class_list(raw: &str) -> Vec<String> {
    if let Ok(names) = serde_json::from_str::<Vec<String>>(raw) {
        return names;
    }
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
