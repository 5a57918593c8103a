//! Text parsing utilities for the jetbeep protocol.
//!
//! This module turns decoded lines into tokens and tokens into typed
//! events and acknowledgement values.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::command::Verb;
use crate::types::{
    Barcode, BarcodeType, DeviceState, NfcCardType, NfcDetection, NfcDetectionError,
    PaymentError, PaymentMetadata, PaymentRequest,
};

/// Number of flags in a `GETSTATE` acknowledgement.
pub const DEVICE_STATE_FLAGS: usize = 5;

/// Splits a decoded line into whitespace-separated tokens.
///
/// # Errors
///
/// Returns a protocol error if the line is not valid UTF-8.
pub fn tokenize(line: &[u8]) -> Result<Vec<&str>> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::protocol(format!("line is not valid UTF-8: {line:?}")))?;
    Ok(text.split_ascii_whitespace().collect())
}

/// Parses the parameters of an event line.
///
/// # Errors
///
/// Returns a protocol error if `verb` is not an event or its parameters are
/// malformed.
pub fn parse_event(verb: Verb, params: &[&str]) -> Result<Event> {
    match verb {
        Verb::MobileConnected => Ok(Event::MobileConnected),
        Verb::MobileDisconnected => Ok(Event::MobileDisconnected),
        Verb::Barcodes => parse_barcodes(params).map(Event::Barcodes),
        Verb::PaymentSuccessful => Ok(Event::PaymentSuccessful),
        Verb::PaymentError => parse_payment_error(params).map(Event::PaymentError),
        Verb::PaymentToken => match params {
            [token] => Ok(Event::PaymentToken((*token).to_string())),
            _ => Err(Error::protocol(format!(
                "PAYMENT_TOKEN expects one token, got {}",
                params.len()
            ))),
        },
        Verb::NfcDetected => parse_nfc_detection(params).map(Event::NfcDetected),
        Verb::NfcRemoved => Ok(Event::NfcRemoved),
        Verb::NfcDetectionError => match params {
            [reason, ..] => Ok(Event::NfcDetectionError(NfcDetectionError::from_code(
                reason,
            ))),
            [] => Err(Error::protocol("NFC_DETECTION_ERROR without reason")),
        },
        Verb::SystemReset => Ok(Event::SystemReset),
        other => Err(Error::protocol(format!("{other} is not an event"))),
    }
}

/// Parses `BARCODES` parameters: flattened `<value> <type>` pairs.
///
/// Type codes outside the known table map to [`BarcodeType::Unknown`].
///
/// # Errors
///
/// Returns a protocol error on an odd token count or a non-numeric type.
pub fn parse_barcodes(params: &[&str]) -> Result<Vec<Barcode>> {
    if params.len() % 2 != 0 {
        return Err(Error::protocol(format!(
            "BARCODES expects value/type pairs, got {} tokens",
            params.len()
        )));
    }

    params
        .chunks_exact(2)
        .map(|pair| {
            let code: u32 = pair[1]
                .parse()
                .map_err(|_| Error::protocol(format!("invalid barcode type: {:?}", pair[1])))?;
            let kind = u8::try_from(code).map_or(BarcodeType::Unknown, BarcodeType::from_code);
            Ok(Barcode {
                value: pair[0].to_string(),
                kind,
            })
        })
        .collect()
}

/// Parses the single reason code of `PAYMENT_ERROR`.
///
/// # Errors
///
/// Returns a protocol error for a missing or unknown code.
pub fn parse_payment_error(params: &[&str]) -> Result<PaymentError> {
    let [code] = params else {
        return Err(Error::protocol(format!(
            "PAYMENT_ERROR expects one code, got {}",
            params.len()
        )));
    };
    PaymentError::from_code(code)
        .ok_or_else(|| Error::protocol(format!("unknown payment error code: {code:?}")))
}

/// Parses `NFC_DETECTED <cardType> [meta...]`.
///
/// # Errors
///
/// Returns a protocol error if the card type is missing or not numeric.
pub fn parse_nfc_detection(params: &[&str]) -> Result<NfcDetection> {
    let Some((card_type, meta)) = params.split_first() else {
        return Err(Error::protocol("NFC_DETECTED without card type"));
    };
    let code: u32 = card_type
        .parse()
        .map_err(|_| Error::protocol(format!("invalid NFC card type: {card_type:?}")))?;
    Ok(NfcDetection {
        card_type: u8::try_from(code).map_or(NfcCardType::Unknown, NfcCardType::from_code),
        meta: meta.join(" "),
    })
}

/// Parses the five `"1"`/`"0"` flags of a `GETSTATE` acknowledgement.
///
/// # Errors
///
/// Returns a protocol error on a wrong flag count or a flag other than
/// `"1"` or `"0"`.
pub fn parse_device_state(values: &[String]) -> Result<DeviceState> {
    if values.len() != DEVICE_STATE_FLAGS {
        return Err(Error::protocol(format!(
            "GETSTATE expects {DEVICE_STATE_FLAGS} flags, got {}",
            values.len()
        )));
    }

    let flag = |value: &str| match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::protocol(format!("invalid state flag: {other:?}"))),
    };

    Ok(DeviceState {
        session_opened: flag(&values[0])?,
        barcodes_requested: flag(&values[1])?,
        payment_created: flag(&values[2])?,
        waiting_for_payment_confirmation: flag(&values[3])?,
        refund_requested: flag(&values[4])?,
    })
}

/// Parses the hexadecimal device id returned by `GET deviceId`.
///
/// # Errors
///
/// Returns a protocol error if the value is not hexadecimal.
pub fn parse_device_id(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::protocol(format!("invalid device id: {value:?}")))
}

/// Parses `key:value` pairs joined by `;`. Empty segments are skipped.
///
/// # Errors
///
/// Returns a protocol error for a segment without `:`.
pub fn parse_metadata(text: &str) -> Result<PaymentMetadata> {
    text.split(';')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .split_once(':')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| Error::protocol(format!("invalid metadata pair: {segment:?}")))
        })
        .collect()
}

/// Parses the arguments of a payment command, the inverse of
/// [`encode_payment_args`](super::command::encode_payment_args).
///
/// # Errors
///
/// Returns a protocol error on a missing or non-numeric amount, a missing
/// transaction id, trailing tokens or malformed metadata.
pub fn parse_payment_args(params: &[&str]) -> Result<PaymentRequest> {
    let (amount, transaction_id, rest) = match params {
        [amount, transaction_id, rest @ ..] => (amount, transaction_id, rest),
        _ => return Err(Error::protocol("payment expects amount and transaction id")),
    };
    let amount: u32 = amount
        .parse()
        .map_err(|_| Error::protocol(format!("invalid amount: {amount:?}")))?;

    let mut request = PaymentRequest::new(amount, *transaction_id);
    match rest {
        [] => {}
        [cashier] => request.cashier_id = Some((*cashier).to_string()),
        [cashier, metadata] => {
            request.cashier_id = Some((*cashier).to_string());
            request.metadata = parse_metadata(metadata)?;
        }
        _ => return Err(Error::protocol("trailing payment arguments")),
    }
    Ok(request)
}
