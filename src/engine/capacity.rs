/// Admission control: true when `booked` visits already fill the day.
pub fn is_full(booked: u32, ceiling: u32) -> bool {
    booked >= ceiling
}
